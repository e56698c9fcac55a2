//! Video and audio frames.

use serde::{Deserialize, Serialize};

use super::{NativeMsg, require_name};
use crate::binding::Bound;
use crate::error::{BridgeError, BridgeResult};

/// Pixel layout of a video frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFmt {
    #[default]
    Rgb24,
    Rgba,
    Bgr24,
    Bgra,
    I422,
    I420,
    Nv21,
    Nv12,
}

/// Video frame metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: i32,
    pub height: i32,
    pub timestamp: i64,
    pub pixel_fmt: PixelFmt,
    pub eof: bool,
}

/// Sample layout of an audio frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioDataFmt {
    #[default]
    Interleave,
    NonInterleave,
}

/// Audio frame metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub timestamp: i64,
    pub sample_rate: i32,
    pub channel_layout: u64,
    pub samples_per_channel: i32,
    pub bytes_per_sample: i32,
    pub number_of_channels: i32,
    pub data_fmt: AudioDataFmt,
    pub line_size: i32,
    pub eof: bool,
}

fn wrong_kind(expected: &str) -> BridgeError {
    BridgeError::InvalidArgument(format!("message is not a {expected}"))
}

macro_rules! info_fields {
    ($info:ident, $info_mut:ident, $kind:literal, $( $get:ident / $set:ident : $ty:ty ),* $(,)?) => {
        $(
            pub fn $get(&self) -> BridgeResult<$ty> {
                self.bound
                    .read(|m| m.$info().map(|info| info.$get))?
                    .ok_or_else(|| wrong_kind($kind))
            }

            pub fn $set(&self, value: $ty) -> BridgeResult<()> {
                self.bound
                    .write(|m| m.$info_mut().map(|info| info.$get = value))?
                    .ok_or_else(|| wrong_kind($kind))
            }
        )*
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// VideoFrame
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct VideoFrame {
    bound: Bound<NativeMsg>,
}

super::message_wrapper!(VideoFrame, sendable);

impl VideoFrame {
    pub fn new(name: &str) -> BridgeResult<Self> {
        require_name(name)?;
        Ok(Self::local(NativeMsg::video_frame(name)))
    }

    /// Snapshot of all metadata fields
    pub fn info(&self) -> BridgeResult<VideoInfo> {
        self.bound
            .read(|m| m.video().cloned())?
            .ok_or_else(|| wrong_kind("video frame"))
    }
}

impl VideoFrame {
    info_fields!(
        video,
        video_mut,
        "video frame",
        width / set_width: i32,
        height / set_height: i32,
        timestamp / set_timestamp: i64,
        pixel_fmt / set_pixel_fmt: PixelFmt,
        eof / set_eof: bool,
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// AudioFrame
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct AudioFrame {
    bound: Bound<NativeMsg>,
}

super::message_wrapper!(AudioFrame, sendable);

impl AudioFrame {
    pub fn new(name: &str) -> BridgeResult<Self> {
        require_name(name)?;
        Ok(Self::local(NativeMsg::audio_frame(name)))
    }

    pub fn info(&self) -> BridgeResult<AudioInfo> {
        self.bound
            .read(|m| m.audio().cloned())?
            .ok_or_else(|| wrong_kind("audio frame"))
    }
}

impl AudioFrame {
    info_fields!(
        audio,
        audio_mut,
        "audio frame",
        timestamp / set_timestamp: i64,
        sample_rate / set_sample_rate: i32,
        channel_layout / set_channel_layout: u64,
        samples_per_channel / set_samples_per_channel: i32,
        bytes_per_sample / set_bytes_per_sample: i32,
        number_of_channels / set_number_of_channels: i32,
        data_fmt / set_data_fmt: AudioDataFmt,
        line_size / set_line_size: i32,
        eof / set_eof: bool,
    );
}
