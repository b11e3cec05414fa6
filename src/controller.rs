//! Controller client: announce, heartbeat, log delivery, usage reports.
//!
//! Raw TCP HTTP/1.1 with one request per connection. Every operation is
//! bounded by a short socket timeout and reports transient failure; the
//! periodic machinery retries. Log entries leave the queue only after the
//! controller answers 200.

use core::fmt::Write as FmtWrite;

use alloc::string::String;
use embassy_net::tcp::TcpSocket;
use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Duration;
use embedded_io_async::Write;
use heapless::String as HString;
use smoltcp::wire::{IpAddress, IpEndpoint, Ipv4Address};

use crate::proto::{self, parse_status_code};
use crate::state::CoreState;
use crate::storage::{Settings, MAX_HOST_LEN};

const IO_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_BUF: usize = 1024;

/// Why an outbound request failed. All variants are retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostError {
    /// No IP configuration; Wi-Fi is down or still associating.
    LinkDown,
    BadAddress,
    Connect,
    Io,
    /// Transport worked but the controller said something other than 200.
    Status(u16),
}

pub type SharedState = Mutex<CriticalSectionRawMutex, CoreState>;
pub type SharedSettings = Mutex<CriticalSectionRawMutex, Settings>;

async fn controller_addr(settings: &SharedSettings) -> (HString<MAX_HOST_LEN>, u16) {
    let settings = settings.lock().await;
    (settings.controller_host.clone(), settings.controller_port)
}

/// POST a JSON body and return once the status line is parsed.
pub async fn post_json(
    stack: &Stack<'static>,
    host: &str,
    port: u16,
    path: &str,
    body: &str,
) -> Result<(), PostError> {
    if stack.config_v4().is_none() {
        return Err(PostError::LinkDown);
    }
    let ip = parse_ipv4(host).ok_or(PostError::BadAddress)?;

    let mut rx_buf = [0u8; RESPONSE_BUF];
    let mut tx_buf = [0u8; 1024];
    let mut socket = TcpSocket::new(*stack, &mut rx_buf, &mut tx_buf);
    socket.set_timeout(Some(IO_TIMEOUT));

    let remote = IpEndpoint::new(IpAddress::Ipv4(ip), port);
    if socket.connect(remote).await.is_err() {
        socket.abort();
        return Err(PostError::Connect);
    }

    let mut request = String::new();
    let _ = write!(
        request,
        "POST {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        path,
        host,
        body.len()
    );

    if socket.write_all(request.as_bytes()).await.is_err()
        || socket.write_all(body.as_bytes()).await.is_err()
    {
        socket.abort();
        return Err(PostError::Io);
    }

    // Only the status line matters; drain until close or buffer full.
    let mut response = [0u8; RESPONSE_BUF];
    let mut total = 0;
    loop {
        match socket.read(&mut response[total..]).await {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                if total >= response.len() {
                    break;
                }
            }
            Err(_) => {
                socket.abort();
                return Err(PostError::Io);
            }
        }
    }
    socket.abort();

    let status = core::str::from_utf8(&response[..total])
        .ok()
        .map(parse_status_code)
        .unwrap_or(0);
    match status {
        200 => Ok(()),
        other => Err(PostError::Status(other)),
    }
}

/// Announce identity at boot and after reconnect.
pub async fn announce(stack: &Stack<'static>, state: &SharedState, settings: &SharedSettings) {
    let (host, port) = controller_addr(settings).await;
    let body = {
        let state = state.lock().await;
        let ip = local_ip_string(stack);
        let mac = mac_string();
        let announce = proto::Announce {
            board_ip: &ip,
            mac_address: &mac,
            board_name: &state.board_name,
            door1_name: &state.doors[0].name,
            door2_name: &state.doors[1].name,
        };
        match proto::announce_body(&announce) {
            Ok(body) => body,
            Err(_) => return,
        }
    };

    match post_json(stack, &host, port, "/api/board-announce", &body).await {
        Ok(()) => log::info!("controller: announced to {}:{}", host.as_str(), port),
        Err(e) => log::warn!("controller: announce failed: {:?}", e),
    }
}

/// Heartbeat; flips the shared link flag and returns whether it succeeded.
pub async fn heartbeat(
    stack: &Stack<'static>,
    state: &SharedState,
    settings: &SharedSettings,
) -> bool {
    let (host, port) = controller_addr(settings).await;
    let body = {
        let state = state.lock().await;
        let ip = local_ip_string(stack);
        let hb = proto::Heartbeat {
            ip_address: &ip,
            board_name: &state.board_name,
        };
        match proto::heartbeat_body(&hb) {
            Ok(body) => body,
            Err(_) => return false,
        }
    };

    let ok = post_json(stack, &host, port, "/api/heartbeat", &body)
        .await
        .is_ok();
    state.lock().await.set_controller_online(ok);
    ok
}

/// Drain the log queue head-first, one entry per request, stopping at the
/// first failure. An entry is acknowledged only after a 200.
pub async fn deliver_logs(stack: &Stack<'static>, state: &SharedState, settings: &SharedSettings) {
    loop {
        let (host, port) = controller_addr(settings).await;
        let pending = {
            let mut state = state.lock().await;
            match state.log_queue.peek() {
                None => return,
                Some((seq, entry)) => match proto::log_entry_body(entry) {
                    Ok(body) => Some((seq, body)),
                    Err(_) => {
                        // An unserializable entry would wedge the head forever.
                        state.log_queue.acknowledge(seq);
                        None
                    }
                },
            }
        };
        let Some((seq, body)) = pending else {
            continue;
        };

        match post_json(stack, &host, port, "/api/access-log", &body).await {
            Ok(()) => {
                let mut state = state.lock().await;
                state.log_queue.acknowledge(seq);
                let remaining = state.log_queue.len();
                if remaining > 0 {
                    log::debug!("controller: log delivered, {} pending", remaining);
                }
            }
            Err(e) => {
                log::debug!("controller: log delivery failed: {:?}", e);
                return;
            }
        }
    }
}

/// Report a temp-code use `(code, per-door count)`.
pub async fn report_usage(
    stack: &Stack<'static>,
    settings: &SharedSettings,
    code: &str,
    current_uses: u32,
) {
    let (host, port) = controller_addr(settings).await;
    let Ok(body) = proto::usage_body(&proto::UsagePost { code, current_uses }) else {
        return;
    };
    if let Err(e) = post_json(stack, &host, port, "/api/temp-code-usage", &body).await {
        log::warn!("controller: usage report failed: {:?}", e);
    }
}

/// Parse the configured controller address as a dotted quad. The
/// controller lives on the same LAN and is addressed by IP; there is no
/// DNS in this path.
fn parse_ipv4(addr: &str) -> Option<Ipv4Address> {
    let mut fields = addr.split('.');
    let a = fields.next()?.parse().ok()?;
    let b = fields.next()?.parse().ok()?;
    let c = fields.next()?.parse().ok()?;
    let d = fields.next()?.parse().ok()?;
    match fields.next() {
        Some(_) => None,
        None => Some(Ipv4Address::new(a, b, c, d)),
    }
}

fn local_ip_string(stack: &Stack<'static>) -> String {
    let mut out = String::new();
    match stack.config_v4() {
        Some(config) => {
            let _ = write!(out, "{}", config.address.address());
        }
        None => out.push_str("0.0.0.0"),
    }
    out
}

fn mac_string() -> String {
    let mac = esp_radio::wifi::sta_mac();
    let mut out = String::new();
    let _ = write!(
        out,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
    out
}
