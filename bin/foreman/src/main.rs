use foreman::{
    connect, watch_link_mode, watch_motor_status, watch_valve_status, BrokerConfig, Commander,
    DeviceController, Dispatcher, Result, StateStore,
};

use std::sync::Arc;

use log::info;
use tokio::task;

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    let mqtt_address = std::env::var("MQTT_ADDRESS").expect("set ENV variable MQTT_ADDRESS");
    let mqtt_username = std::env::var("MQTT_USER").ok();
    let mqtt_password = std::env::var("MQTT_PASS").ok();

    let namespace =
        std::env::var("TOPIC_NAMESPACE").unwrap_or_else(|_| "irrigation".to_string());
    let motor_count: u8 = std::env::var("MOTOR_COUNT")
        .unwrap_or_else(|_| "2".to_string())
        .parse()
        .expect("MOTOR_COUNT must be a number");
    let valve_keys: Vec<String> = std::env::var("VALVE_KEYS")
        .unwrap_or_else(|_| "V1,V2".to_string())
        .split(',')
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .collect();
    let state_path =
        std::env::var("STATE_PATH").unwrap_or_else(|_| "foreman_state.json".to_string());

    let (client, stream) = connect(&BrokerConfig {
        address: mqtt_address,
        username: mqtt_username,
        password: mqtt_password,
        client_prefix: "foreman".to_string(),
    })
    .await?;
    info!("connected mqtt");

    let store = Arc::new(StateStore::open(state_path));
    let dispatcher = Dispatcher::new(client.clone());
    let commander = Commander::new(client, namespace.clone());

    let mut subscriptions = Vec::new();
    for index in 1..=motor_count {
        subscriptions.push(watch_motor_status(
            &dispatcher,
            &namespace,
            index,
            store.clone(),
        ));
    }
    subscriptions.push(watch_valve_status(&dispatcher, &namespace, store.clone()));
    subscriptions.push(watch_link_mode(&dispatcher, &namespace, store.clone()));

    let mut controllers = Vec::new();
    for index in 1..=motor_count {
        controllers.push(DeviceController::motor(
            index,
            commander.clone(),
            store.clone(),
        ));
    }
    for key in &valve_keys {
        controllers.push(DeviceController::valve(
            key,
            &valve_keys,
            commander.clone(),
            store.clone(),
        ));
    }

    // devices left in auto mode pick their saved schedules back up
    for controller in &mut controllers {
        controller.resume();
    }

    let dispatch_handle = task::spawn(dispatcher.clone().run(stream));

    info!(
        "synchronizing {} devices on namespace '{}'",
        controllers.len(),
        namespace
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    dispatch_handle.abort();

    Ok(())
}
