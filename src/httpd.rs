//! Inbound HTTP API on port 80.
//!
//! Raw TCP server, one request per connection. The controller pushes
//! snapshots and emergency commands here; a tiny status page covers field
//! diagnostics. Bodies are bounded and read per Content-Length before
//! routing.

use core::fmt::Write as FmtWrite;

use alloc::string::String;
use alloc::vec::Vec;
use embassy_net::tcp::TcpSocket;
use embassy_net::Stack;
use embassy_time::{Duration, Instant};
use embedded_io_async::Write;

use crate::controller::{SharedSettings, SharedState};
use crate::door::Override;
use crate::proto::{
    self, find_header_end, parse_content_length, DoorOverrideReq, EmergencyUnlockReq,
    SetControllerReq,
};
use crate::storage;

const IO_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BODY: usize = 24 * 1024;
const HEADER_BUF: usize = 1024;

/// Run the HTTP server task.
pub async fn run_server(stack: &'static Stack<'static>, state: &'static SharedState, settings: &'static SharedSettings) {
    let mut rx_buf = [0u8; 2048];
    let mut tx_buf = [0u8; 2048];

    loop {
        let mut socket = TcpSocket::new(*stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(IO_TIMEOUT));

        if socket.accept(80).await.is_err() {
            socket.abort();
            continue;
        }

        handle_request(&mut socket, state, settings).await;
        socket.abort();
    }
}

async fn handle_request(
    socket: &mut TcpSocket<'_>,
    state: &SharedState,
    settings: &SharedSettings,
) {
    let mut request: Vec<u8> = Vec::new();
    let mut chunk = [0u8; HEADER_BUF];

    // Read headers, then exactly Content-Length bytes of body.
    let (header_end, content_length) = loop {
        let n = match socket.read(&mut chunk).await {
            Ok(n) if n > 0 => n,
            _ => return,
        };
        request.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_header_end(&request) {
            let headers = core::str::from_utf8(&request[..end]).unwrap_or("");
            let len = parse_content_length(headers).unwrap_or(0);
            if len > MAX_BODY {
                send_response(socket, 413, "Payload Too Large", "application/json", proto::FAILURE_BODY).await;
                return;
            }
            break (end, len);
        }
        if request.len() > MAX_BODY {
            return;
        }
    };

    let body_start = header_end + 4;
    while request.len() < body_start + content_length {
        let n = match socket.read(&mut chunk).await {
            Ok(n) if n > 0 => n,
            _ => return,
        };
        request.extend_from_slice(&chunk[..n]);
    }

    let headers = core::str::from_utf8(&request[..header_end]).unwrap_or("");
    let first_line = headers.lines().next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("").split('?').next().unwrap_or("");
    let body = &request[body_start..body_start + content_length];

    let now_ms = Instant::now().as_millis();

    match (method, path) {
        ("POST", "/api/sync") => handle_sync(socket, state, settings, body, now_ms).await,
        ("POST", "/api/emergency-lock") => {
            state.lock().await.emergency_lock(now_ms);
            send_ok(socket).await;
        }
        ("POST", "/api/emergency-unlock") => {
            let duration = proto::parse_body::<EmergencyUnlockReq>(body)
                .unwrap_or_default()
                .duration
                .unwrap_or(0);
            state.lock().await.emergency_unlock(duration, now_ms);
            send_ok(socket).await;
        }
        ("POST", "/api/emergency-reset") => {
            state.lock().await.emergency_reset(now_ms);
            send_ok(socket).await;
        }
        ("POST", "/api/door-override") => handle_door_override(socket, state, body, now_ms).await,
        ("POST", "/api/set-controller") => handle_set_controller(socket, settings, body).await,
        ("GET", "/") => handle_status(socket, state, now_ms).await,
        _ => send_response(socket, 404, "Not Found", "text/plain", "Not Found").await,
    }
}

async fn handle_sync(
    socket: &mut TcpSocket<'_>,
    state: &SharedState,
    settings: &SharedSettings,
    body: &[u8],
    now_ms: u64,
) {
    let snapshot = match proto::parse_snapshot(body) {
        Ok(s) => s,
        Err(e) => {
            log::error!("sync: rejected snapshot: {}", e);
            send_response(socket, 500, "Internal Server Error", "application/json", proto::FAILURE_BODY).await;
            return;
        }
    };

    let applied = {
        let mut state = state.lock().await;
        proto::apply_snapshot(&mut state, snapshot, now_ms)
    };

    // Names and durations ride along in settings so they survive reboot.
    if applied.door_names_changed || applied.unlock_durations_changed {
        let mut settings = settings.lock().await;
        let state = state.lock().await;
        for (idx, door) in state.doors.iter().enumerate() {
            settings.door_names[idx].clear();
            let _ = settings.door_names[idx].push_str(&door.name);
            settings.unlock_ms[idx] = door.momentary_unlock_ms as u32;
        }
        if applied.door_names_changed {
            storage::flash::save_door_names(&settings.door_names).await;
        }
        if applied.unlock_durations_changed {
            storage::flash::save_unlock_ms(&settings.unlock_ms).await;
        }
    }

    send_ok(socket).await;
}

async fn handle_door_override(
    socket: &mut TcpSocket<'_>,
    state: &SharedState,
    body: &[u8],
    now_ms: u64,
) {
    let Ok(req) = proto::parse_body::<DoorOverrideReq>(body) else {
        send_response(socket, 500, "Internal Server Error", "application/json", proto::FAILURE_BODY).await;
        return;
    };
    let ov = match req.mode.as_str() {
        "lock" => Override::Lock,
        "unlock" => Override::Unlock,
        "" => Override::None,
        other => {
            log::warn!("httpd: unknown door override {:?}", other);
            send_response(socket, 400, "Bad Request", "application/json", proto::FAILURE_BODY).await;
            return;
        }
    };
    let known = state.lock().await.set_door_override(req.door_number, ov, now_ms);
    if known {
        send_ok(socket).await;
    } else {
        send_response(socket, 400, "Bad Request", "application/json", proto::FAILURE_BODY).await;
    }
}

async fn handle_set_controller(
    socket: &mut TcpSocket<'_>,
    settings: &SharedSettings,
    body: &[u8],
) {
    let Ok(req) = proto::parse_body::<SetControllerReq>(body) else {
        send_response(socket, 500, "Internal Server Error", "application/json", proto::FAILURE_BODY).await;
        return;
    };
    {
        let mut settings = settings.lock().await;
        settings.controller_host.clear();
        let _ = settings.controller_host.push_str(&req.controller_ip);
        settings.controller_port = req.controller_port;
    }
    storage::flash::save_controller(&req.controller_ip, req.controller_port).await;
    log::info!(
        "httpd: controller set to {}:{}",
        req.controller_ip,
        req.controller_port
    );
    send_ok(socket).await;
}

async fn handle_status(socket: &mut TcpSocket<'_>, state: &SharedState, now_ms: u64) {
    let mut body = String::new();
    {
        let state = state.lock().await;
        let _ = write!(
            body,
            "<h1>{}</h1>\
             <p>Controller: {}</p>\
             <p>Emergency: {:?}</p>\
             <p>Pending logs: {}</p>",
            state.board_name,
            if state.controller_online { "online" } else { "offline" },
            state.board_emergency.state,
            state.log_queue.len(),
        );
        for door in state.doors.iter() {
            let _ = write!(
                body,
                "<p>Door {} ({}): relay {}, mode {}, hold {}</p>",
                door.number,
                door.name,
                if door.relay_on { "on" } else { "off" },
                door.schedule_mode.as_str(),
                door.scheduled_hold,
            );
        }
        let _ = write!(body, "<p>Time: {}</p>", state.timestamp(now_ms));
    }
    send_response(socket, 200, "OK", "text/html", &body).await;
}

async fn send_ok(socket: &mut TcpSocket<'_>) {
    send_response(socket, 200, "OK", "application/json", proto::SUCCESS_BODY).await;
}

async fn send_response(
    socket: &mut TcpSocket<'_>,
    status: u16,
    status_text: &str,
    content_type: &str,
    body: &str,
) {
    let mut response = String::new();
    let _ = write!(
        response,
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    );

    let _ = socket.write_all(response.as_bytes()).await;
}
