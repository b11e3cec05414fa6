//! Minimal SNTP client feeding the wall clock.
//!
//! One 48-byte query per refresh. Schedules depend on calendar time, so the
//! node keeps retrying quickly until the first fix, then refreshes hourly.
//! Everything else keeps working on monotonic time while unsynchronized.

use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{with_timeout, Duration, Instant, Timer};

use crate::controller::SharedState;

const NTP_PORT: u16 = 123;
const NTP_PACKET: usize = 48;
/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01 (Unix epoch).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const RETRY_INTERVAL: Duration = Duration::from_secs(30);
const REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Periodic SNTP refresh loop.
pub async fn run(stack: &'static Stack<'static>, state: &'static SharedState, ntp_host: &'static str) {
    loop {
        if stack.config_v4().is_none() {
            Timer::after(Duration::from_secs(1)).await;
            continue;
        }

        match query(stack, ntp_host).await {
            Some(unix_ms) => {
                let now_ms = Instant::now().as_millis();
                let mut state = state.lock().await;
                let first_fix = !state.wall_clock.is_set();
                state.wall_clock.set_unix_ms(unix_ms, now_ms);
                if first_fix {
                    log::info!("sntp: wall clock set, {}", state.timestamp(now_ms));
                    state.reevaluate_schedules(now_ms);
                }
                drop(state);
                Timer::after(REFRESH_INTERVAL).await;
            }
            None => {
                Timer::after(RETRY_INTERVAL).await;
            }
        }
    }
}

async fn query(stack: &Stack<'static>, host: &str) -> Option<u64> {
    let addrs = match stack.dns_query(host, DnsQueryType::A).await {
        Ok(addrs) => addrs,
        Err(e) => {
            log::debug!("sntp: dns lookup failed: {:?}", e);
            return None;
        }
    };
    let server = *addrs.first()?;

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buf = [0u8; 128];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_buf = [0u8; 128];
    let mut socket = UdpSocket::new(*stack, &mut rx_meta, &mut rx_buf, &mut tx_meta, &mut tx_buf);
    if socket.bind(49_123).is_err() {
        return None;
    }

    // Client request: version 4, mode 3, everything else zero.
    let mut packet = [0u8; NTP_PACKET];
    packet[0] = 0x23;

    let remote = IpEndpoint::new(server, NTP_PORT);
    if socket.send_to(&packet, remote).await.is_err() {
        return None;
    }

    let mut response = [0u8; NTP_PACKET];
    let result = with_timeout(QUERY_TIMEOUT, socket.recv_from(&mut response)).await;
    let n = match result {
        Ok(Ok((n, _))) => n,
        _ => {
            log::debug!("sntp: no response from {}", host);
            return None;
        }
    };
    if n < NTP_PACKET {
        return None;
    }

    // Transmit timestamp: seconds + fraction, big endian, at offset 40.
    let secs = u32::from_be_bytes([response[40], response[41], response[42], response[43]]) as u64;
    let frac = u32::from_be_bytes([response[44], response[45], response[46], response[47]]) as u64;
    if secs < NTP_UNIX_OFFSET {
        return None;
    }
    let unix_ms = (secs - NTP_UNIX_OFFSET) * 1000 + (frac * 1000 >> 32);
    Some(unix_ms)
}
