use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum_auth::AuthBearer;
use log::{info, warn};
use serde_json::json;
use tokio::process::Command;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::manifest::RunManifest;
use crate::{metrics, utils};

/// owner_id 和 event_name 会拼进文件名，不能包含路径分隔符
fn check_name(field: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && !value.starts_with('.')
        && !value.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(AppError::bad_request(format!("{field} 含有非法字符: {value:?}")))
    }
}

fn index_command(state: &AppState, req: &JobRequest) -> Result<Command> {
    let mut cmd = Command::new(&state.exe);
    cmd.arg("index")
        .arg(format!("--owner-id={}", req.owner_id))
        .arg(format!("--event-name={}", req.event_name))
        .arg("--manifest-dir")
        .arg(&state.manifest_dir)
        .arg("--no-progress");
    match (&req.drive_folder_id, &req.local_folder) {
        (Some(id), None) => cmd.arg("--folder-id").arg(id),
        (None, Some(path)) => cmd.arg("--local-folder").arg(path),
        _ => return Err(AppError::bad_request("drive_folder_id 和 local_folder 必须且只能填写一个")),
    };
    // 服务进程的环境变量不能和请求里的来源冲突
    cmd.env_remove("DRIVE_FOLDER_ID")
        .env("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()))
        .stdin(Stdio::null())
        .kill_on_drop(true);
    Ok(cmd)
}

/// 运行一次索引任务
#[utoipa::path(
    post,
    path = "/run",
    request_body = JobRequest,
    responses(
        (status = 200, body = JobResponse),
        (status = 400, description = "请求参数错误"),
        (status = 401, description = "token 错误"),
    )
)]
pub async fn run_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobResponse>> {
    if token != state.token {
        return Err(AppError::unauthorized());
    }
    check_name("owner_id", &req.owner_id)?;
    check_name("event_name", &req.event_name)?;
    let mut cmd = index_command(&state, &req)?;

    let _guard = state.running.lock().await;
    let manifest_path = RunManifest::path(&state.manifest_dir, &req.owner_id, &req.event_name);
    // 避免读到上一次运行留下的清单
    if let Err(e) = tokio::fs::remove_file(&manifest_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(e.into());
        }
    }

    info!("开始索引任务: owner={} event={}", req.owner_id, req.event_name);
    let start = Instant::now();
    let output = cmd.output().await?;
    let exit_code = output.status.code().unwrap_or(-1);
    info!("索引任务结束: exit_code={exit_code}, 耗时 {:.2?}", start.elapsed());

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let logs = utils::tail_lines(&text, state.log_tail);

    let manifest = match RunManifest::read_from(&manifest_path) {
        Ok(manifest) => serde_json::to_value(manifest)?,
        Err(e) => {
            warn!("未找到运行清单 {}: {e}", manifest_path.display());
            json!({ "status": "manifest not found" })
        }
    };

    Ok(Json(JobResponse { exit_code, logs, manifest }))
}

/// 导出 prometheus 指标
#[utoipa::path(get, path = "/metrics", responses((status = 200, body = String)))]
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::super::create_app;
    use super::*;

    fn state(exe: &str, dir: &std::path::Path) -> Arc<AppState> {
        AppState::new(exe.into(), dir.to_path_buf(), "secret".into(), 60)
    }

    fn run_request(token: &str, body: Value) -> Request<Body> {
        Request::post("/run")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(state("/bin/false", dir.path()));
        let resp = app.oneshot(run_request("nope", json!({"local_folder": "/tmp"}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn exactly_one_source_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(state("/bin/false", dir.path()));
        let resp = app.clone().oneshot(run_request("secret", json!({}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let both = json!({"local_folder": "/tmp", "drive_folder_id": "abc"});
        let resp = app.oneshot(run_request("secret", both)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(state("/bin/false", dir.path()));
        let cases = [("owner_id", "../etc"), ("owner_id", "a/b"), ("event_name", "a\\b"), ("event_name", "")];
        for (field, value) in cases {
            let mut body = json!({"local_folder": "/tmp"});
            body[field] = json!(value);
            let resp = app.clone().oneshot(run_request("secret", body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{field}={value:?}");
        }
    }

    #[test]
    fn common_id_characters_are_allowed() {
        for name in ["someone@example.com", "team 7", "Wedding+Party", "-dash", "v1.2"] {
            assert!(check_name("owner_id", name).is_ok(), "{name}");
        }
        assert!(check_name("owner_id", "bad\0name").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn finished_run_returns_manifest_and_logs() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        // 代替 index 子命令的脚本，$5 是 --manifest-dir 的值
        let exe = dir.path().join("fake-index.sh");
        std::fs::write(
            &exe,
            r##"#!/bin/sh
echo "$2 $3"
echo "indexed" >&2
cat > "$5/index_manifest_someone@example.com_party.json" <<JSON
{"owner_id": "someone@example.com", "event_id": "party", "files_indexed": 3,
 "points_upserted": 2, "started_at": "2024-05-01T10:00:00Z",
 "timestamp": 1714557600.5, "elapsed_secs": 1.5}
JSON
"##,
        )
        .unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let app = create_app(state(exe.to_str().unwrap(), dir.path()));
        let body = json!({"local_folder": "/tmp", "owner_id": "someone@example.com", "event_name": "party"});
        let resp = app.oneshot(run_request("secret", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let resp: JobResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.exit_code, 0);
        assert_eq!(resp.logs, vec!["--owner-id=someone@example.com --event-name=party", "indexed"]);
        assert_eq!(resp.manifest["owner_id"], "someone@example.com");
        assert_eq!(resp.manifest["files_indexed"], 3);
        assert_eq!(resp.manifest["points_upserted"], 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_run_reports_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(RunManifest::path(dir.path(), "public", "event"), "{}").unwrap();
        let app = create_app(state("/bin/false", dir.path()));
        let resp = app.oneshot(run_request("secret", json!({"local_folder": "/tmp"}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let resp: JobResponse = serde_json::from_slice(&body).unwrap();
        assert_ne!(resp.exit_code, 0);
        assert_eq!(resp.manifest, json!({"status": "manifest not found"}));
    }

    #[tokio::test]
    async fn metrics_are_exported() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(state("/bin/false", dir.path()));
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
