//! M115 response parser
//! a response line is a sequence of `KEY:value` tokens, KEY is [A-Z_-]+, value runs until the
//! whitespace in front of the next KEY: token or the end of the line

use std::collections::HashMap;
use lazy_static::lazy_static;
use regex::Regex;

use crate::common::error::{ErrorCode, UpdaterError};
use crate::entity::bo::device_identity_bo::DeviceIdentityBo;

lazy_static! {
    static ref FIRST_KEY_RE: Regex = Regex::new(r"[A-Z_-]+:").expect("invalid key regex");
    static ref NEXT_KEY_RE: Regex = Regex::new(r"\s+([A-Z_-]+):").expect("invalid next key regex");
}

/// parse one raw line into key -> trimmed value
pub fn parse_m115(line: &str) -> Result<DeviceIdentityBo, UpdaterError> {
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
    let first = FIRST_KEY_RE.find(line).ok_or_else(|| {
        UpdaterError::new(ErrorCode::ParseFailure, format!("no KEY:value token in response: {:?}", line))
    })?;

    let mut fields = HashMap::new();
    let mut key = &line[first.start()..first.end() - 1];
    let mut pos = first.end();
    loop {
        let rest = &line[pos..];
        match NEXT_KEY_RE.captures(rest) {
            Some(caps) => match (caps.get(0), caps.get(1)) {
                (Some(separator), Some(next_key)) => {
                    fields.insert(key.to_string(), rest[..separator.start()].trim().to_string());
                    key = next_key.as_str();
                    pos += separator.end();
                }
                _ => {
                    fields.insert(key.to_string(), rest.trim().to_string());
                    break;
                }
            },
            None => {
                fields.insert(key.to_string(), rest.trim().to_string());
                break;
            }
        }
    }
    Ok(DeviceIdentityBo::new(fields))
}
