use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let uptime_seconds = state.uptime_seconds();
    let memory_info = get_memory_info();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": state.config.server.host,
            "port": state.config.server.port
        },
        "upstream": {
            "endpoint": state.config.upstream.endpoint,
            "rotation_interval_secs": state.config.upstream.rotation_interval_secs,
            "max_session_secs": state.config.upstream.max_session_secs
        },
        "relay": {
            "sessions_started": metrics.sessions_started,
            "sessions_completed": metrics.sessions_completed,
            "sessions_active": metrics.sessions_active,
            "generations_opened": metrics.generations_opened,
            "results_persisted": metrics.results_persisted,
            "results_forwarded": metrics.results_forwarded,
            "error_frames": metrics.error_frames
        },
        "memory": memory_info
    }))
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }

        json!({
            "resident_memory_bytes": 0,
            "virtual_memory_bytes": 0,
            "available": false
        })
    }

    #[cfg(not(target_os = "linux"))]
    {
        json!({
            "resident_memory_bytes": 0,
            "virtual_memory_bytes": 0,
            "available": false,
            "note": "Memory info not available on this platform"
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::recognizer::remote::RemoteRecognizer;
    use crate::transcript::MemoryTranscriptStore;
    use actix_web::{body::to_bytes, http::StatusCode};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health_reports_relay_counters() {
        let config = AppConfig::default();
        let state = AppState::new(
            config.clone(),
            Arc::new(RemoteRecognizer::new(config.upstream.endpoint.clone())),
            Arc::new(MemoryTranscriptStore::new()),
        );
        state.metrics.record_session_started();

        let response = health_check(web::Data::new(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["relay"]["sessions_started"], 1);
        assert_eq!(value["relay"]["sessions_active"], 1);
        assert_eq!(value["upstream"]["max_session_secs"], 60);
    }
}
