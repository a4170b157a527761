//! inbound command surface
//! every route turns its body into an UpdaterCommand, hands it to the orchestrator and
//! answers once the orchestrator accepted or rejected it

use actix_web::{post, web, App, HttpResponse, HttpServer, Responder};
use tokio::sync::{mpsc, oneshot};

use crate::common::error::UpdaterError;
use crate::entity::dto::command_dto::{FlashWithPathDto, FlashWithUrlDto, PortDto};
use crate::updater::orchestrator::{CommandReply, UpdaterCommand};
use crate::{error, info, warn};

const LOG_TAG: &str = "http_server";

pub struct AppState {
    pub command_tx: mpsc::UnboundedSender<UpdaterCommand>,
}

async fn dispatch<F>(state: &AppState, make_command: F) -> HttpResponse
where
    F: FnOnce(CommandReply) -> UpdaterCommand,
{
    let (reply_tx, reply_rx) = oneshot::channel::<Result<(), UpdaterError>>();
    if state.command_tx.send(make_command(reply_tx)).is_err() {
        error!(LOG_TAG, "orchestrator is not running");
        return HttpResponse::InternalServerError().body("Error.");
    }
    match reply_rx.await {
        Ok(Ok(())) => HttpResponse::Ok().body("Ok."),
        Ok(Err(e)) => {
            warn!(LOG_TAG, "command rejected: {}", e);
            HttpResponse::InternalServerError().body("Error.")
        }
        Err(_) => {
            error!(LOG_TAG, "orchestrator dropped the command without answering");
            HttpResponse::InternalServerError().body("Error.")
        }
    }
}

#[post("/flashFirmwareWithPath")]
async fn flash_firmware_with_path(state: web::Data<AppState>, body: web::Json<FlashWithPathDto>) -> impl Responder {
    let body = body.into_inner();
    info!(LOG_TAG, "flash {} on {}", body.file_path, body.selected_port);
    dispatch(&state, |reply| UpdaterCommand::FlashWithPath {
        file_path: body.file_path.into(),
        port: body.selected_port,
        reply,
    })
    .await
}

#[post("/flashFirmwareWithURL")]
async fn flash_firmware_with_url(state: web::Data<AppState>, body: web::Json<FlashWithUrlDto>) -> impl Responder {
    let body = body.into_inner();
    info!(LOG_TAG, "flash {} on {}", body.hex_url, body.selected_port);
    dispatch(&state, |reply| UpdaterCommand::FlashWithUrl {
        url: body.hex_url,
        port: body.selected_port,
        reply,
    })
    .await
}

#[post("/flashUpdate")]
async fn flash_update(state: web::Data<AppState>, body: web::Json<PortDto>) -> impl Responder {
    let port = body.into_inner().selected_port;
    info!(LOG_TAG, "flash pending update on {}", port);
    dispatch(&state, |reply| UpdaterCommand::FlashUpdate { port, reply }).await
}

#[post("/checkForUpdates")]
async fn check_for_updates(state: web::Data<AppState>, body: web::Json<PortDto>) -> impl Responder {
    let port = body.into_inner().selected_port;
    info!(LOG_TAG, "check for updates on {}", port);
    dispatch(&state, |reply| UpdaterCommand::CheckForUpdate { port, reply }).await
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(flash_firmware_with_path)
        .service(flash_firmware_with_url)
        .service(flash_update)
        .service(check_for_updates);
}

/// run the http server until it is stopped
pub async fn run(host: &str, port: u16, command_tx: mpsc::UnboundedSender<UpdaterCommand>) -> std::io::Result<()> {
    let state = web::Data::new(AppState { command_tx });
    info!(LOG_TAG, "http server listening on {}:{}", host, port);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
        .bind((host, port))?
        .run()
        .await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::error::ErrorCode;
    use actix_web::{body::to_bytes, http::StatusCode, test};

    // answers every command, rejecting the ones on port "busy"
    fn fake_orchestrator() -> mpsc::UnboundedSender<UpdaterCommand> {
        let (tx, mut rx) = mpsc::unbounded_channel::<UpdaterCommand>();
        actix_web::rt::spawn(async move {
            while let Some(command) = rx.recv().await {
                let (port, reply) = match command {
                    UpdaterCommand::FlashWithPath { port, reply, .. } => (port, reply),
                    UpdaterCommand::FlashWithUrl { port, reply, .. } => (port, reply),
                    UpdaterCommand::FlashUpdate { port, reply } => (port, reply),
                    UpdaterCommand::CheckForUpdate { port, reply } => (port, reply),
                };
                let result = if port == "busy" {
                    Err(UpdaterError::new(ErrorCode::Busy, "busy"))
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
            }
        });
        tx
    }

    #[actix_web::test]
    async fn test_routes_answer_ok() {
        let state = web::Data::new(AppState { command_tx: fake_orchestrator() });
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;

        let requests = vec![
            ("/flashFirmwareWithPath", r#"{"file_path": "/tmp/upload.hex", "selected_port": "/dev/ttyACM0"}"#),
            ("/flashFirmwareWithURL", r#"{"hex_url": "http://x/fw.hex", "selected_port": "/dev/ttyACM0"}"#),
            ("/flashUpdate", r#"{"selected_port": "/dev/ttyACM0"}"#),
            ("/checkForUpdates", r#"{"selected_port": "/dev/ttyACM0"}"#),
        ];
        for (uri, body) in requests {
            let req = test::TestRequest::post()
                .uri(uri)
                .insert_header(("content-type", "application/json"))
                .set_payload(body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
            assert_eq!(to_bytes(resp.into_body()).await.unwrap(), "Ok.");
        }
    }

    #[actix_web::test]
    async fn test_rejection_is_error() {
        let state = web::Data::new(AppState { command_tx: fake_orchestrator() });
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/flashUpdate")
            .insert_header(("content-type", "application/json"))
            .set_payload(r#"{"selected_port": "busy"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(to_bytes(resp.into_body()).await.unwrap(), "Error.");
    }

    #[actix_web::test]
    async fn test_orchestrator_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let state = web::Data::new(AppState { command_tx: tx });
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/checkForUpdates")
            .insert_header(("content-type", "application/json"))
            .set_payload(r#"{"selected_port": "/dev/ttyACM0"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
