//! Demo controllers served by the `rattle-server` binary.
//!
//! | Target        | Kind       | Does                                               |
//! |---------------|------------|----------------------------------------------------|
//! | `Echo.Relay`  | responding | sends the payload straight back                    |
//! | `Main.Index`  | responding | fills the `#description` element                   |
//! | `Main.Json`   | responding | re-encodes the form and calls `test.RecieveJSON`   |
//! | `Main.Raw`    | responding | calls `test.RecieveRAW` with the form's text       |
//! | `Main.Timer`  | streaming  | pushes the time into `#timer` once a second        |
//! | `Main.File`   | responding | saves an uploaded file into the upload directory   |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rattle_server::application::{HandlerSet, Request};
use rattle_server::infrastructure::RattleServer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const DESCRIPTION: &str =
    "Rattle is a tiny bidirectional RPC framework over WebSocket, built for dynamic web applications";

/// The form the browser demo posts to `Main.*`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainForm {
    #[serde(rename = "Text", alias = "text", default)]
    pub text: String,
}

/// Registers every demo controller on `server`.
pub fn register(server: &mut RattleServer, upload_dir: PathBuf) {
    server.register_controller("Echo", echo());
    server.register_controller("Main", main_controller(Arc::new(upload_dir)));
}

fn echo() -> HandlerSet {
    HandlerSet::new().responding("Relay", |_: serde_json::Value, req: Request| async move {
        Some(req.reply(req.payload().to_vec()))
    })
}

fn main_controller(upload_dir: Arc<PathBuf>) -> HandlerSet {
    HandlerSet::new()
        .responding("Index", |_: (), req: Request| async move {
            Some(req.new_message("=#description", DESCRIPTION))
        })
        .responding("Json", |form: MainForm, req: Request| async move {
            match serde_json::to_vec(&form) {
                Ok(data) => Some(req.new_message("test.RecieveJSON", data)),
                Err(e) => Some(req.new_message("+#errors", format!("failed to encode JSON reply: {e}"))),
            }
        })
        .responding("Raw", |form: MainForm, req: Request| async move {
            Some(req.new_message("test.RecieveRAW", form.text))
        })
        .streaming("Timer", |_: (), req: Request| async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                if req.send(req.new_message("=#timer", clock_now())).await.is_err() {
                    debug!("timer for {} stopped: connection closed", req.connection().id());
                    return;
                }
            }
        })
        .responding("File", move |_: serde_json::Value, req: Request| {
            let upload_dir = Arc::clone(&upload_dir);
            async move {
                save_upload(&upload_dir, &req).await;
                None
            }
        })
}

async fn save_upload(upload_dir: &Path, req: &Request) {
    let Some(upload) = req.upload() else {
        warn!("Main.File called without an upload");
        return;
    };

    // Only the final path component is trusted.
    let Some(file_name) = Path::new(&upload.name).file_name() else {
        warn!("refusing upload with unusable name {:?}", upload.name);
        return;
    };
    let path = upload_dir.join(file_name);

    info!("incoming file {:?}: {} bytes", upload.name, upload.data.len());
    if let Err(e) = tokio::fs::write(&path, &upload.data).await {
        warn!("failed to save {}: {e}", path.display());
    }
}

/// `HH:MM:SS` (UTC) for the timer demo.
fn clock_now() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_clock(secs)
}

fn format_clock(epoch_secs: u64) -> String {
    let day = epoch_secs % 86_400;
    format!("{:02}:{:02}:{:02}", day / 3600, (day % 3600) / 60, day % 60)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
