// demos/mesh_cli.rs
//
// A thin interactive driver for the controller facade, analogous in spirit
// to the workspace's own `examples/linux/cn_listener.rs`: connect to one
// real bridge and exercise it from a terminal, rather than wiring up the
// TUI this workspace deliberately leaves out of scope.
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use meshpower_ble::BtleBridge;
use meshpower_controller::Controller;
use meshpower_core::Target;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bridge = Arc::new(BtleBridge::new().await?);
    info!("scanning for a mesh bridge...");
    let found = bridge.scan(Duration::from_secs(5), None).await?;
    let device = found.first().ok_or("no bridge found during scan")?;
    info!("connecting to {} ({})", device.name, device.id);
    bridge.connect(&device.id).await?;

    let controller = Controller::new(bridge);

    info!("connected. commands: duty <node|ALL> <pct>, threshold <mw>, priority <node>, status, quit");
    let mut input = String::new();
    loop {
        input.clear();
        print!("mesh> ");
        io::stdout().flush()?;
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let words: Vec<&str> = input.split_whitespace().collect();
        match words.as_slice() {
            ["duty", target, pct] => {
                if let (Ok(target), Ok(pct)) = (target.parse::<Target>(), pct.parse::<i32>()) {
                    if let Err(e) = controller.set_target_duty(target, pct).await {
                        error!("{e}");
                    }
                } else {
                    println!("usage: duty <node|ALL> <pct>");
                }
            }
            ["threshold", mw] => match mw.parse::<f64>() {
                Ok(mw) => controller.set_threshold(mw),
                Err(_) => println!("usage: threshold <milliwatts>"),
            },
            ["priority", node] => {
                if let Ok(node) = node.parse() {
                    if let Err(e) = controller.set_priority(node) {
                        error!("{e}");
                    }
                } else {
                    println!("usage: priority <node>");
                }
            }
            ["status"] => println!("{}", controller.status()),
            ["quit"] | ["exit"] => break,
            _ => println!("unrecognized command"),
        }
    }

    controller.clear_threshold().await;
    controller.disconnect().await;
    Ok(())
}
