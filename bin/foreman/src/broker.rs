use std::time::Duration;

use log::{error, info, warn};
use paho_mqtt as mqtt;
use tokio::time;
use uuid::Uuid;

use crate::Result;

pub type MessageStream = mqtt::AsyncReceiver<Option<mqtt::Message>>;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const OFFLINE_BUFFER: i32 = 100;

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_prefix: String,
}

/// Open the single broker connection the whole process shares.
///
/// The client id carries a random suffix so concurrently running dashboard
/// instances never collide on a broker-side session. The returned handle is
/// usable even when the broker is unreachable: sends are buffered, the
/// client reconnects on a fixed interval, and a failed or timed-out first
/// connect is logged rather than surfaced — callers tolerate silent no-ops
/// until the transport comes up.
///
/// The message stream is opened before connecting so nothing published
/// between CONNACK and the first poll is lost.
pub async fn connect(config: &BrokerConfig) -> Result<(mqtt::AsyncClient, MessageStream)> {
    let client_id = format!("{}-{}", config.client_prefix, Uuid::new_v4().simple());

    let create_opts = mqtt::CreateOptionsBuilder::new_v3()
        .server_uri(&config.address)
        .client_id(&client_id)
        .send_while_disconnected(true)
        .max_buffered_messages(OFFLINE_BUFFER)
        .finalize();

    let mut client = mqtt::AsyncClient::new(create_opts)?;
    let stream = client.get_stream(None);

    let mut conn_opts = mqtt::ConnectOptionsBuilder::new_v3();
    conn_opts
        .keep_alive_interval(KEEP_ALIVE)
        .clean_session(true)
        .automatic_reconnect(RETRY_INTERVAL, RETRY_INTERVAL);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        conn_opts.user_name(username).password(password);
    }

    let conn_opts = conn_opts.finalize();

    match time::timeout(CONNECT_TIMEOUT, client.connect(conn_opts.clone())).await {
        Ok(Ok(_)) => info!("connected to {} as {}", config.address, client_id),
        Ok(Err(err)) => {
            error!("broker connect failed, continuing degraded: {err}");
            spawn_retry(client.clone(), conn_opts);
        }
        Err(_) => {
            // the in-flight attempt keeps going underneath us
            warn!(
                "no CONNACK from {} within {:?}, continuing degraded",
                config.address, CONNECT_TIMEOUT
            );
        }
    }

    Ok((client, stream))
}

fn spawn_retry(client: mqtt::AsyncClient, conn_opts: mqtt::ConnectOptions) {
    tokio::spawn(async move {
        loop {
            time::sleep(RETRY_INTERVAL).await;

            match client.connect(conn_opts.clone()).await {
                Ok(_) => {
                    info!("broker connection established");
                    break;
                }
                Err(err) => warn!("broker connect retry failed: {err}"),
            }
        }
    });
}
