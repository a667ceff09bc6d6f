//! End-to-end scenarios driven through the command protocol

use home_runtime::{Event, EventKind, EventListener, FnListener, ListenerError};
use smarthome_shell::{Config, SmartHome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

fn quiet_home(config: Config) -> SmartHome {
    SmartHome::launch(&config).unwrap()
}

fn empty_config() -> Config {
    let mut config = Config::default();
    config.home.standard_setup = false;
    config
}

fn record(home: &SmartHome, kind: EventKind) -> UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: Arc<dyn EventListener> = Arc::new(FnListener::new("recorder", move |e: &Event| {
        tx.send(e.clone())
            .map_err(|e| ListenerError::new(e.to_string()))
    }));
    home.event_bus().subscribe(kind, listener);
    rx
}

#[tokio::test]
async fn test_turning_on_a_light_publishes_one_state_change() {
    let home = quiet_home(empty_config());
    let mut changes = record(&home, EventKind::DeviceStateChanged);

    assert_eq!(home.execute("add light L1").await, "Added Light L1");
    assert_eq!(home.execute("on L1").await, "L1 turned ON");
    assert_eq!(home.execute("on L1").await, "L1 is already ON");

    let event = timeout(Duration::from_secs(2), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.get_str("device"), Some("L1"));
    assert_eq!(event.get_str("newState"), Some("ON"));
    assert!(timeout(Duration::from_millis(300), changes.recv()).await.is_err());
    assert!(home.registry().get("L1").unwrap().is_on());

    home.shutdown().await;
}

#[tokio::test]
async fn test_power_threshold_event_within_one_sample() {
    let mut config = empty_config();
    config.power.sample_interval_ms = 200;
    let home = quiet_home(config);
    let mut alerts = record(&home, EventKind::PowerThresholdExceeded);

    home.execute("add light Lamp").await;
    assert_eq!(home.execute("power threshold 1").await, "Power threshold set to 1W");
    assert_eq!(home.execute("power monitor start").await, "Power monitoring started");
    home.execute("on Lamp").await;

    let event = timeout(Duration::from_millis(1000), alerts.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.source(), "PowerMonitor");
    assert_eq!(event.get("threshold").and_then(|v| v.as_u64()), Some(1));
    assert!(home.execute("power stats").await.contains("Threshold: 1 W"));

    assert_eq!(home.execute("power monitor stop").await, "Power monitoring stopped");
    home.shutdown().await;
}

#[tokio::test]
async fn test_comfort_rule_corrects_hot_thermostat() {
    let home = quiet_home(empty_config());
    home.execute("add thermostat Main").await;
    home.execute("on Main").await;
    assert_eq!(
        home.execute("set Main temperature 30").await,
        "Main temperature set to 30°C"
    );
    assert!(home
        .execute("automate add temperature Comfort 22 2")
        .await
        .starts_with("Added rule Comfort"));

    assert_eq!(
        home.execute("automate run").await,
        "Cycle complete: 1 evaluated, 1 executed, 1 applied, 0 failed, 0 timed out"
    );
    assert_eq!(home.registry().get("Main").unwrap().temperature().unwrap(), 22);

    home.shutdown().await;
}

#[tokio::test]
async fn test_motion_triggers_security_response() {
    let home = quiet_home(empty_config());
    home.execute("add light Porch").await;
    home.execute("add camera Gate").await;
    home.execute("add camera Garage").await;
    home.execute("on Gate").await;
    home.execute("automate add security Guard 60").await;

    assert_eq!(home.execute("simulate motion Gate").await, "Motion detected by Gate");

    let porch = home.registry().get("Porch").unwrap();
    for _ in 0..50 {
        home.execute("automate run").await;
        if porch.is_on() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(porch.is_on());
    assert_eq!(porch.brightness().unwrap(), 100);
    assert!(home.registry().get("Garage").unwrap().is_on());

    home.execute("off Porch").await;
    home.execute("simulate motion Gate").await;
    home.execute("automate run").await;
    assert!(!porch.is_on());

    home.shutdown().await;
}

#[tokio::test]
async fn test_monitor_and_services_report() {
    let home = quiet_home(Config::default());
    assert_eq!(home.registry().len(), 6);

    assert_eq!(home.execute("monitor start").await, "Device monitor started");
    assert_eq!(home.execute("monitor start").await, "Device monitor is already running");
    home.execute("on LivingRoomLight").await;
    assert!(home
        .execute("monitor stats LivingRoomLight")
        .await
        .starts_with("LivingRoomLight Statistics:"));
    assert_eq!(
        home.execute("monitor stats Nowhere").await,
        "Error: Device not found: Nowhere"
    );

    let services = home.execute("services").await;
    assert!(services.contains("Event system: running"));
    assert!(services.contains("Device monitor: running"));
    assert!(services.contains("Power monitoring: stopped (threshold 500W)"));

    assert_eq!(home.execute("events stop").await, "Event system stopped");
    assert_eq!(home.execute("events stop").await, "Event system is not running");
    assert!(home.execute("events stats").await.starts_with("Event System Statistics:"));

    home.shutdown().await;
}
