pub mod device_identity_bo;
pub mod flash_job_bo;
