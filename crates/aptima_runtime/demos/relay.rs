//! Three extensions relaying a command and its result.
//!
//! Run with `cargo run --example relay`.

use aptima_bridge::{
    AddonRegistry, BridgeResult, Cmd, CmdResult, Env, Extension, Message, NativeMsg, StatusCode,
};
use aptima_runtime::{App, AppConfig, init_tracing};

const APP: &str = r#"
[app]
log_filter = "relay=info,aptima_runtime=info"

[[extensions]]
name = "a"
addon = "multiplier"
property = { forward = "B", factor = 2 }

[[extensions]]
name = "b"
addon = "multiplier"
property = { forward = "C", factor = 3 }

[[extensions]]
name = "c"
addon = "multiplier"
property = { factor = 5 }

[[connections]]
from = "a"
kind = "cmd"
name = "B"
to = ["b"]

[[connections]]
from = "b"
kind = "cmd"
name = "C"
to = ["c"]
"#;

#[derive(Default)]
struct Multiplier {
    forward: Option<String>,
    factor: i64,
}

impl Multiplier {
    fn handle(&self, env: &Env, cmd: Cmd) -> BridgeResult<()> {
        let n = cmd.get_property_int64("data").unwrap_or(1) * self.factor;
        env.log_info(&format!("{} -> {n}", cmd.name()?));

        let Some(next) = &self.forward else {
            let result = CmdResult::for_cmd(StatusCode::Ok, &cmd)?;
            result.set_property_from_json("detail", &format!(r#"{{"result":{n}}}"#))?;
            return env.return_result(result, &cmd);
        };

        let out = Cmd::new(next)?;
        out.set_property("data", n)?;
        env.send_cmd(out, move |env, outcome| {
            let reply = match outcome {
                Ok(result) => {
                    let reply = CmdResult::new(result.status().unwrap_or(StatusCode::Error));
                    if let Ok(detail) = result.get_property_to_json("detail") {
                        let _ = reply.set_property_from_json("detail", &detail);
                    }
                    reply
                }
                Err(e) => {
                    env.log_warn(&format!("downstream failed: {e}"));
                    CmdResult::new(StatusCode::Error)
                }
            };
            let _ = env.return_result(reply, &cmd);
        })
    }
}

impl Extension for Multiplier {
    fn on_configure(&mut self, env: &Env) {
        self.forward = env.get_property_string("forward").ok();
        self.factor = env.get_property_int64("factor").unwrap_or(1);
        let _ = env.on_configure_done();
    }

    fn on_cmd(&mut self, env: &Env, cmd: Cmd) {
        if let Err(e) = self.handle(env, cmd) {
            env.log_error(&format!("relay failed: {e}"));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_toml_str(APP)?;
    init_tracing(&config.app.log_filter);

    let addons = AddonRegistry::new_shared();
    addons.register("multiplier", |_| Box::new(Multiplier::default()))?;

    let app = App::new(config, addons)?;
    app.start().await?;

    let result = app.send_cmd("a", NativeMsg::cmd("A")).await?;
    tracing::info!(
        "Result for A: {}",
        result.properties().to_json("detail")?
    );

    app.stop().await?;
    Ok(())
}
