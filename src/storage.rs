//! Settings storage with flash persistence, plus compile-time configuration.
//!
//! Network credentials and defaults are embedded at compile time via
//! environment variables. Runtime-changeable settings (board name,
//! controller address, door names, unlock durations) live in a wear-leveled
//! sequential-storage map. Emergency state is deliberately never persisted:
//! a reboot returns the node to normal operation.

use heapless::String as HString;
use sequential_storage::map::{Key, SerializationError, Value};

use crate::state::DOOR_COUNT;

/// Flash storage region: 64KB near the end of a 4MB part, 16 pages of 4KB.
#[cfg(feature = "esp32")]
const FLASH_RANGE: core::ops::Range<u32> = 0x3D_0000..0x3E_0000;

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_HOST_LEN: usize = 16;

/// Storage keys for the settings map.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum StorageKey {
    BoardName = 0,
    ControllerHost = 1,
    ControllerPort = 2,
    DoorName1 = 3,
    DoorName2 = 4,
    UnlockMs1 = 5,
    UnlockMs2 = 6,
}

impl Key for StorageKey {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        *buffer.first_mut().ok_or(SerializationError::BufferTooSmall)? = *self as u8;
        Ok(1)
    }

    fn deserialize_from(buffer: &[u8]) -> Result<(Self, usize), SerializationError> {
        let key = match buffer.first() {
            Some(0) => Self::BoardName,
            Some(1) => Self::ControllerHost,
            Some(2) => Self::ControllerPort,
            Some(3) => Self::DoorName1,
            Some(4) => Self::DoorName2,
            Some(5) => Self::UnlockMs1,
            Some(6) => Self::UnlockMs2,
            Some(_) => return Err(SerializationError::InvalidFormat),
            None => return Err(SerializationError::BufferTooSmall),
        };
        Ok((key, 1))
    }
}

/// Length-prefixed string value.
pub struct StoredStr<const N: usize>(pub HString<N>);

impl<'a, const N: usize> Value<'a> for StoredStr<N> {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        let bytes = self.0.as_bytes();
        let needed = 1 + bytes.len();
        if buffer.len() < needed {
            return Err(SerializationError::BufferTooSmall);
        }
        buffer[0] = bytes.len() as u8;
        buffer[1..needed].copy_from_slice(bytes);
        Ok(needed)
    }

    fn deserialize_from(buffer: &'a [u8]) -> Result<Self, SerializationError> {
        let len = *buffer.first().ok_or(SerializationError::BufferTooSmall)? as usize;
        if len > N {
            return Err(SerializationError::InvalidFormat);
        }
        let raw = buffer
            .get(1..1 + len)
            .ok_or(SerializationError::BufferTooSmall)?;
        let s = core::str::from_utf8(raw).map_err(|_| SerializationError::InvalidFormat)?;
        let mut out = HString::new();
        let _ = out.push_str(s);
        Ok(StoredStr(out))
    }
}

/// Little-endian u32 value (ports, durations).
pub struct StoredU32(pub u32);

impl<'a> Value<'a> for StoredU32 {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        if buffer.len() < 4 {
            return Err(SerializationError::BufferTooSmall);
        }
        buffer[..4].copy_from_slice(&self.0.to_le_bytes());
        Ok(4)
    }

    fn deserialize_from(buffer: &'a [u8]) -> Result<Self, SerializationError> {
        let bytes: [u8; 4] = buffer
            .get(..4)
            .ok_or(SerializationError::BufferTooSmall)?
            .try_into()
            .unwrap();
        Ok(StoredU32(u32::from_le_bytes(bytes)))
    }
}

/// Compile-time configuration, embedded via environment variables.
#[derive(Clone)]
pub struct Config {
    pub ssid: &'static str,
    pub password: &'static str,
    pub controller_host: &'static str,
    pub controller_port: u16,
    pub board_name: &'static str,
    pub tz_offset_min: i32,
    pub ntp_host: &'static str,
    pub door_names: [&'static str; DOOR_COUNT],
}

impl Config {
    pub fn get() -> Self {
        Self {
            ssid: option_env!("NODE_SSID").unwrap_or("unconfigured"),
            password: option_env!("NODE_PASSWORD").unwrap_or(""),
            controller_host: option_env!("NODE_CONTROLLER_HOST").unwrap_or("192.168.1.10"),
            controller_port: match option_env!("NODE_CONTROLLER_PORT") {
                Some(s) => parse_u16(s, 8099),
                None => 8099,
            },
            board_name: option_env!("NODE_BOARD_NAME").unwrap_or("access-node"),
            tz_offset_min: match option_env!("NODE_TZ_OFFSET_MIN") {
                Some(s) => parse_i32(s),
                None => 0,
            },
            ntp_host: option_env!("NODE_NTP_HOST").unwrap_or("pool.ntp.org"),
            door_names: [
                option_env!("NODE_DOOR1_NAME").unwrap_or("Door 1"),
                option_env!("NODE_DOOR2_NAME").unwrap_or("Door 2"),
            ],
        }
    }
}

const fn parse_u16(s: &str, fallback: u16) -> u16 {
    let bytes = s.as_bytes();
    let mut result: u16 = 0;
    let mut i = 0;
    let mut seen = false;
    while i < bytes.len() {
        let digit = bytes[i];
        if digit >= b'0' && digit <= b'9' {
            result = result * 10 + (digit - b'0') as u16;
            seen = true;
        }
        i += 1;
    }
    if seen {
        result
    } else {
        fallback
    }
}

const fn parse_i32(s: &str) -> i32 {
    let bytes = s.as_bytes();
    let mut result: i32 = 0;
    let mut i = 0;
    let mut negative = false;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'-' && i == 0 {
            negative = true;
        } else if b >= b'0' && b <= b'9' {
            result = result * 10 + (b - b'0') as i32;
        }
        i += 1;
    }
    if negative {
        -result
    } else {
        result
    }
}

/// The runtime-mutable settings, flash-backed on the target.
#[derive(Clone)]
pub struct Settings {
    pub board_name: HString<MAX_NAME_LEN>,
    pub controller_host: HString<MAX_HOST_LEN>,
    pub controller_port: u16,
    pub door_names: [HString<MAX_NAME_LEN>; DOOR_COUNT],
    pub unlock_ms: [u32; DOOR_COUNT],
}

impl Settings {
    /// Defaults from the compile-time configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut board_name = HString::new();
        let _ = board_name.push_str(config.board_name);
        let mut controller_host = HString::new();
        let _ = controller_host.push_str(config.controller_host);
        let mut names: [HString<MAX_NAME_LEN>; DOOR_COUNT] = Default::default();
        for (out, name) in names.iter_mut().zip(config.door_names) {
            let _ = out.push_str(name);
        }
        Self {
            board_name,
            controller_host,
            controller_port: config.controller_port,
            door_names: names,
            unlock_ms: [3000; DOOR_COUNT],
        }
    }
}

/// Flash operations, target only. On the host `Settings` stays in memory.
#[cfg(feature = "esp32")]
pub mod flash {
    use super::*;
    use embassy_embedded_hal::adapter::BlockingAsync;
    use esp_storage::FlashStorage;
    use sequential_storage::{cache::NoCache, map};

    async fn fetch<V: for<'a> Value<'a>>(key: StorageKey, buf: &mut [u8]) -> Option<V> {
        let mut flash = BlockingAsync::new(FlashStorage::new());
        match map::fetch_item::<StorageKey, V, _>(
            &mut flash,
            FLASH_RANGE,
            &mut NoCache::new(),
            buf,
            &key,
        )
        .await
        {
            Ok(value) => value,
            Err(e) => {
                log::error!("storage: flash fetch error: {:?}", e);
                None
            }
        }
    }

    async fn store<V: for<'a> Value<'a>>(key: StorageKey, value: &V, buf: &mut [u8]) -> bool {
        let mut flash = BlockingAsync::new(FlashStorage::new());
        match map::store_item::<StorageKey, V, _>(
            &mut flash,
            FLASH_RANGE,
            &mut NoCache::new(),
            buf,
            &key,
            value,
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                log::error!("storage: flash store error: {:?}", e);
                false
            }
        }
    }

    /// Load settings, falling back to compile-time defaults per key.
    pub async fn load_settings(config: &Config) -> Settings {
        let mut settings = Settings::from_config(config);
        let mut buf = [0u8; 64];

        if let Some(StoredStr(name)) = fetch::<StoredStr<MAX_NAME_LEN>>(StorageKey::BoardName, &mut buf).await {
            settings.board_name = name;
        }
        if let Some(StoredStr(host)) =
            fetch::<StoredStr<MAX_HOST_LEN>>(StorageKey::ControllerHost, &mut buf).await
        {
            if !host.is_empty() {
                settings.controller_host = host;
            }
        }
        if let Some(StoredU32(port)) = fetch(StorageKey::ControllerPort, &mut buf).await {
            if port != 0 {
                settings.controller_port = port as u16;
            }
        }
        for (idx, key) in [StorageKey::DoorName1, StorageKey::DoorName2].iter().enumerate() {
            if let Some(StoredStr(name)) = fetch::<StoredStr<MAX_NAME_LEN>>(*key, &mut buf).await {
                if !name.is_empty() {
                    settings.door_names[idx] = name;
                }
            }
        }
        for (idx, key) in [StorageKey::UnlockMs1, StorageKey::UnlockMs2].iter().enumerate() {
            if let Some(StoredU32(ms)) = fetch(*key, &mut buf).await {
                if ms != 0 {
                    settings.unlock_ms[idx] = ms;
                }
            }
        }
        settings
    }

    pub async fn save_controller(host: &str, port: u16) {
        let mut buf = [0u8; 64];
        let mut value: HString<MAX_HOST_LEN> = HString::new();
        let _ = value.push_str(host);
        if !store(StorageKey::ControllerHost, &StoredStr(value), &mut buf).await {
            log::error!("storage: failed to save controller host");
        }
        if !store(StorageKey::ControllerPort, &StoredU32(port as u32), &mut buf).await {
            log::error!("storage: failed to save controller port");
        }
    }

    pub async fn save_door_names(names: &[HString<MAX_NAME_LEN>; DOOR_COUNT]) {
        let mut buf = [0u8; 64];
        for (key, name) in [StorageKey::DoorName1, StorageKey::DoorName2].iter().zip(names) {
            if !store(*key, &StoredStr(name.clone()), &mut buf).await {
                log::error!("storage: failed to save door name");
            }
        }
    }

    pub async fn save_unlock_ms(unlock_ms: &[u32; DOOR_COUNT]) {
        let mut buf = [0u8; 64];
        for (key, ms) in [StorageKey::UnlockMs1, StorageKey::UnlockMs2].iter().zip(unlock_ms) {
            if !store(*key, &StoredU32(*ms), &mut buf).await {
                log::error!("storage: failed to save unlock duration");
            }
        }
    }
}
