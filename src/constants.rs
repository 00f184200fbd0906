//! `Wrenlink` Constants
//!
//! This module contains the constants used throughout the `Wrenlink` library:
//! queue and registry capacities, debounce delays, codec latency targets and
//! persistence keys.

/// Depth of the request and response channels between the API and the processor
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Depth of the internal notification queue drained after every handler
pub const NOTIFICATION_QUEUE_DEPTH: usize = 16;

/// Maximum number of concurrently armed timers
pub const MAX_TIMERS: usize = 8;

/// Maximum number of observers registered across all logical sources
pub const MAX_OBSERVERS: usize = 16;

/// Maximum number of BIG subgroups tracked per BIS sync state
pub const MAX_SUBGROUPS: usize = 4;

/// Maximum number of broadcast sources tracked by the broadcast manager
pub const MAX_BROADCAST_SOURCES: usize = 4;

/// Maximum length of a persisted device property blob in bytes
pub const MAX_PROPERTY_BLOB: usize = 32;

/// `BD_ADDR` length in bytes
pub const BD_ADDR_LENGTH: usize = 6;

/// Delay before a requested input rescan runs, in milliseconds
pub const RESCAN_DEBOUNCE_MS: u64 = 50;

/// Delay before a broadcast-only LE Audio context change is evaluated, in milliseconds
pub const LEA_CONTEXT_CHANGE_DELAY_MS: u64 = 50;

/// Delay before restarting an audio graph after a USB reconfiguration while starting
pub const GRAPH_RESTART_DELAY_MS: u64 = 200;

/// Minimum interval between absolute volume updates sent to a sink
pub const SINK_VOLUME_UPDATE_DELAY_MS: u64 = 200;

/// Interval between consecutive USB HID volume step commands
pub const USB_VOLUME_STEP_DELAY_MS: u64 = 20;

/// Consecutive rescans allowed to change state before the loop is reported stalled
pub const MAX_RESCAN_ITERATIONS: u8 = 16;

/// Maximum HID volume steps sent while the host does not report back
pub const USB_VOLUME_STEP_COUNT_MAX: u8 = 20;

/// HID volume steps sent in a burst to identify the host behaviour
pub const USB_VOLUME_PROBE_BURST: u8 = 4;

/// Below this USB volume percentage no volume-down step is sent unless the target is zero
pub const USB_VOLUME_DOWN_CUTOFF_PERCENT: u8 = 7;

/// Window in microseconds around the target latency accepted by the audio graph
pub const LATENCY_THRESHOLD_US: u32 = 5_000;

/// Target latency for LC3 with 10 ms frames (music)
pub const LC3_10MS_TARGET_LATENCY_US: u32 = 25_000;

/// Target latency for LC3 with 7.5 ms frames (low latency gaming)
pub const LC3_7_5MS_TARGET_LATENCY_US: u32 = 19_000;

/// Target latency for aptX Lite with default frames (ultra low latency)
pub const APTX_LITE_TARGET_LATENCY_US: u32 = 9_900;

/// Target latency for aptX Lite with 6.25 ms frames
pub const APTX_LITE_6_25MS_TARGET_LATENCY_US: u32 = 12_340;

/// Target latency for aptX adaptive over LE
pub const APTX_ADAPTIVE_TARGET_LATENCY_US: u32 = 30_000;

/// Persistence tag of the VCS client configuration blob
pub const VCS_CONFIG_PERSISTENCE_TAG: u8 = 0x04;

/// Bit pattern meaning "sync to any BIS" in a BIS sync mask
pub const BIS_SYNC_NO_PREFERENCE: u32 = 0xFFFF_FFFF;

/// Broadcast identifier placeholder letting the stack pick a random one
pub const BROADCAST_ID_DONT_CARE: u32 = 0xFFFF_FFFF;

/// Maximum broadcast source name length in bytes
pub const MAX_BROADCAST_NAME_LENGTH: usize = 32;

/// Maximum broadcast code length in bytes
pub const MAX_BROADCAST_CODE_LENGTH: usize = 16;

/// Minimum broadcast code length in bytes accepted from storage
pub const MIN_BROADCAST_CODE_LENGTH: usize = 4;

/// Length of a serialised broadcast audio configuration
pub const BROADCAST_AUDIO_CONFIG_LENGTH: usize = 32;

/// Length of a serialised broadcast identifier
pub const BROADCAST_ID_LENGTH: usize = 4;

/// Default SDU size for a single channel broadcast BIS
pub const BROADCAST_DEFAULT_SDU_SIZE: u16 = 100;

/// Default SDU interval in microseconds
pub const BROADCAST_DEFAULT_SDU_INTERVAL_US: u32 = 10_000;

/// Default presentation delay in microseconds
pub const BROADCAST_DEFAULT_PRESENTATION_DELAY_US: u32 = 40_000;

/// Default maximum transport latency in milliseconds
pub const BROADCAST_DEFAULT_MAX_LATENCY_MS: u16 = 10;

/// Default number of retransmissions
pub const BROADCAST_DEFAULT_RTN: u8 = 2;
