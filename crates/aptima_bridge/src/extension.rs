//! Extension capability set.
//!
//! The core drives an extension through its lifecycle hooks and delivers
//! messages to its handlers. Every method has a default, so an extension
//! implements only what it needs.

use crate::env::Env;
use crate::error::BridgeResult;
use crate::msg::{AudioFrame, Cmd, CmdResult, Data, StatusCode, VideoFrame};

fn report(env: &Env, what: &str, result: BridgeResult<()>) {
    if let Err(e) = result {
        tracing::warn!(extension = %env.name(), error = %e, "Default {} failed", what);
    }
}

/// Lifecycle hooks and message handlers of an extension.
///
/// Hooks run on the extension's own task. A hook signals completion through
/// the matching `Env::on_*_done` call, either before returning or later from
/// a callback or a spawned task.
pub trait Extension: Send + 'static {
    fn on_configure(&mut self, env: &Env) {
        report(env, "on_configure", env.on_configure_done());
    }

    fn on_init(&mut self, env: &Env) {
        report(env, "on_init", env.on_init_done());
    }

    fn on_start(&mut self, env: &Env) {
        report(env, "on_start", env.on_start_done());
    }

    fn on_stop(&mut self, env: &Env) {
        report(env, "on_stop", env.on_stop_done());
    }

    fn on_deinit(&mut self, env: &Env) {
        report(env, "on_deinit", env.on_deinit_done());
    }

    /// Answers every command with an OK result.
    fn on_cmd(&mut self, env: &Env, cmd: Cmd) {
        let result = CmdResult::new(StatusCode::Ok);
        report(env, "on_cmd", env.return_result(result, &cmd));
    }

    fn on_data(&mut self, env: &Env, data: Data) {
        let _ = (env, data);
    }

    fn on_video_frame(&mut self, env: &Env, frame: VideoFrame) {
        let _ = (env, frame);
    }

    fn on_audio_frame(&mut self, env: &Env, frame: AudioFrame) {
        let _ = (env, frame);
    }
}

/// Extension with every default behavior. Concrete extensions can hold one
/// and delegate the hooks they do not customize.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtension;

impl Extension for DefaultExtension {}
