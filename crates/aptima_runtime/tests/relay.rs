//! Command relay across three extensions.

mod common;

use aptima_bridge::{
    AddonRegistry, BridgeResult, Cmd, CmdResult, Env, Extension, Message, NativeMsg, StatusCode,
};
use aptima_runtime::{App, AppConfig, ConnectionKind};
use serde_json::json;

/// Multiplies the incoming `data` by `factor`, then either forwards the
/// product as the `forward` command or answers with it.
#[derive(Default)]
struct Relay {
    forward: Option<String>,
    factor: i64,
    spawn: bool,
}

impl Relay {
    fn relay(&self, env: &Env, cmd: Cmd) -> BridgeResult<()> {
        let n = cmd.get_property_int64("data").unwrap_or(1) * self.factor;

        let Some(next) = &self.forward else {
            let result = CmdResult::for_cmd(StatusCode::Ok, &cmd)?;
            result.set_property_from_json("detail", &json!({ "result": n }).to_string())?;
            return env.return_result(result, &cmd);
        };

        let out = Cmd::new(next)?;
        out.set_property("data", n)?;

        if self.spawn {
            let env = env.clone();
            tokio::spawn(async move {
                let reply = passthrough(env.call(out).await);
                let _ = env.return_result(reply, &cmd);
            });
            return Ok(());
        }

        env.send_cmd(out, move |env, outcome| {
            let _ = env.return_result(passthrough(outcome), &cmd);
        })
    }
}

/// A result for the upstream command carrying the downstream detail as is
fn passthrough(outcome: BridgeResult<CmdResult>) -> CmdResult {
    match outcome {
        Ok(result) => {
            let status = result.status().unwrap_or(StatusCode::Error);
            let reply = CmdResult::new(status);
            if let Ok(detail) = result.get_property_to_json("detail") {
                let _ = reply.set_property_from_json("detail", &detail);
            }
            reply
        }
        Err(e) => {
            let reply = CmdResult::new(StatusCode::Error);
            let _ = reply.set_property("detail", e.to_string());
            reply
        }
    }
}

impl Extension for Relay {
    fn on_configure(&mut self, env: &Env) {
        self.forward = env.get_property_string("forward").ok();
        self.factor = env.get_property_int64("factor").unwrap_or(1);
        self.spawn = env.get_property_bool("spawn").unwrap_or(false);
        let _ = env.on_configure_done();
    }

    fn on_cmd(&mut self, env: &Env, cmd: Cmd) {
        if let Err(e) = self.relay(env, cmd) {
            env.log_error(&format!("relay failed: {e}"));
        }
    }
}

fn relay_app(spawn: bool) -> App {
    let addons = AddonRegistry::new_shared();
    addons
        .register("relay", |_| Box::new(Relay::default()))
        .unwrap();

    let config = AppConfig::new()
        .with_settings(common::fast_settings())
        .with_extension_property("a", "relay", json!({ "forward": "B", "factor": 2, "spawn": spawn }))
        .with_extension_property("b", "relay", json!({ "forward": "C", "factor": 3, "spawn": spawn }))
        .with_extension_property("c", "relay", json!({ "factor": 5 }))
        .connect("a", ConnectionKind::Cmd, "B", &["b"])
        .connect("b", ConnectionKind::Cmd, "C", &["c"]);
    App::new(config, addons).unwrap()
}

fn detail(result: &NativeMsg) -> serde_json::Value {
    serde_json::from_str(&result.properties().to_json("detail").unwrap()).unwrap()
}

#[tokio::test]
async fn test_relay_returns_detail_unchanged() {
    let app = relay_app(false);
    app.start().await.unwrap();

    let result = app.send_cmd("a", NativeMsg::cmd("A")).await.unwrap();
    assert_eq!(result.result_info().unwrap().status, StatusCode::Ok);
    assert!(result.result_info().unwrap().is_completed);
    assert_eq!(detail(&result), json!({ "result": 30 }));
    assert_eq!(app.core().in_flight(), 0);

    app.stop().await.unwrap();
}

#[tokio::test]
async fn test_relay_from_spawned_tasks() {
    let app = relay_app(true);
    app.start().await.unwrap();

    for _ in 0..3 {
        let result = app.send_cmd("a", NativeMsg::cmd("A")).await.unwrap();
        assert_eq!(detail(&result), json!({ "result": 30 }));
    }

    app.stop().await.unwrap();
}

#[tokio::test]
async fn test_unrouted_hop_reports_no_destination() {
    let addons = AddonRegistry::new_shared();
    addons
        .register("relay", |_| Box::new(Relay::default()))
        .unwrap();
    let config = AppConfig::new()
        .with_settings(common::fast_settings())
        .with_extension_property("a", "relay", json!({ "forward": "B", "factor": 2 }));
    let app = App::new(config, addons).unwrap();
    app.start().await.unwrap();

    let result = app.send_cmd("a", NativeMsg::cmd("A")).await.unwrap();
    assert_eq!(result.result_info().unwrap().status, StatusCode::Error);
    let text = result.properties().get_as::<String>("detail").unwrap();
    assert!(text.contains("No destination"));

    app.stop().await.unwrap();
}
