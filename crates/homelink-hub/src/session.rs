//! Per-hub session: handshake, authorization, and the subscription layer.
//!
//! One task per connection owns both socket halves, the cipher state for
//! each direction, and the frame decoder. The device set is shared with the
//! API surface through [`SessionHandle`]; outbound publishes funnel through
//! an unbounded channel drained by the same task, so the wire order matches
//! the cipher chain order.

use crate::codec::{self, FrameDecoder};
use crate::device::{self, Device};
use crate::events::HubEvent;
use crate::{AUTHORIZATION_TIMEOUT, SessionAuthorizer};
use anyhow::Context;
use homelink_common::crypto::{Aes128Cbc, DiffieHellman, trim_zero_padding};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, timeout_at};

const SERVICES: [&str; 3] = ["zigbee", "modbus", "custom"];

/// JSON envelope spoken on the wire in both directions.
#[derive(Debug, Serialize)]
pub(crate) struct Envelope {
    action: &'static str,
    topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<Value>,
}

impl Envelope {
    fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            action: "subscribe",
            topic: topic.into(),
            message: None,
        }
    }

    fn publish(topic: impl Into<String>, message: Value) -> Self {
        Self {
            action: "publish",
            topic: topic.into(),
            message: Some(message),
        }
    }
}

/// Shared view of a live, authorized hub session.
pub struct SessionHandle {
    unique_id: String,
    owner: OnceLock<String>,
    devices: Mutex<BTreeMap<String, Device>>,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl SessionHandle {
    /// Hub id learned during authorization. Keys the session within its user.
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Owning user's name, set once authorization succeeds.
    pub fn owner(&self) -> Option<&str> {
        self.owner.get().map(String::as_str)
    }

    /// The session's device set.
    pub fn devices(&self) -> &Mutex<BTreeMap<String, Device>> {
        &self.devices
    }

    /// Send a hub-native partial state to an endpoint. Numeric endpoints
    /// fold the endpoint id into the keys, path endpoints into the topic.
    pub fn publish(
        &self,
        device_topic: &str,
        endpoint_id: u8,
        numeric: bool,
        message: Map<String, Value>,
    ) {
        let mut topic = format!("td/{device_topic}");

        let message = if numeric {
            message
                .into_iter()
                .map(|(key, value)| (format!("{key}_{endpoint_id}"), value))
                .collect()
        } else {
            if endpoint_id != 0 {
                topic.push_str(&format!("/{endpoint_id}"));
            }

            message
        };

        let _ = self
            .outbound
            .send(Envelope::publish(topic, Value::Object(message)));
    }
}

/// Run one hub connection to completion.
pub(crate) async fn run(
    socket: TcpStream,
    authorizer: Arc<dyn SessionAuthorizer>,
    events: mpsc::UnboundedSender<HubEvent>,
) {
    let peer = socket.peer_addr().ok();

    match drive(socket, authorizer, events).await {
        Ok(()) => tracing::debug!(?peer, "Hub connection closed"),
        Err(error) => tracing::debug!(?peer, "Hub connection ended: {error:#}"),
    }
}

async fn drive(
    socket: TcpStream,
    authorizer: Arc<dyn SessionAuthorizer>,
    events: mpsc::UnboundedSender<HubEvent>,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + AUTHORIZATION_TIMEOUT;
    let (mut reader, mut writer) = socket.into_split();

    // Handshake: 12 raw bytes, no framing
    let mut hello = [0u8; 12];
    timeout_at(deadline, reader.read_exact(&mut hello))
        .await
        .context("authorization timeout")??;

    let prime = u32::from_be_bytes(hello[0..4].try_into().unwrap());
    let generator = u32::from_be_bytes(hello[4..8].try_into().unwrap());
    let hub_public = u32::from_be_bytes(hello[8..12].try_into().unwrap());

    if prime == 0 || generator == 0 {
        anyhow::bail!("malformed handshake");
    }

    let dh = DiffieHellman::new(prime, generator);
    writer.write_all(&dh.public_key().to_be_bytes()).await?;

    let shared = dh.shared_secret(hub_public);
    let mut decryptor = Aes128Cbc::from_shared(shared);
    let mut decoder = FrameDecoder::new();

    // Authorization: the first framed payload names the hub and its token
    let mut chunk = vec![0u8; 4096];
    let mut frame = loop {
        if let Some(frame) = decoder.next_frame() {
            break frame;
        }

        let read = timeout_at(deadline, reader.read(&mut chunk))
            .await
            .context("authorization timeout")??;

        if read == 0 {
            anyhow::bail!("connection closed during authorization");
        }

        decoder.feed(&chunk[..read]);
    };

    decryptor
        .decrypt(&mut frame)
        .map_err(|error| anyhow::anyhow!("authorization record: {error}"))?;
    let payload: Value =
        serde_json::from_slice(trim_zero_padding(&frame)).context("authorization payload")?;

    let unique_id = payload
        .get("uniqueId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let token = hex::decode(
        payload
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    )
    .unwrap_or_default();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
    let handle = Arc::new(SessionHandle {
        unique_id,
        owner: OnceLock::new(),
        devices: Mutex::new(BTreeMap::new()),
        outbound,
    });

    let Some(user) = authorizer.authorize(&token, &handle) else {
        anyhow::bail!("client token not recognized");
    };

    let _ = handle.owner.set(user.clone());

    let mut session = Session {
        writer,
        encryptor: Aes128Cbc::from_shared(shared),
        decryptor,
        decoder,
        handle: handle.clone(),
        events,
        user: user.clone(),
    };

    tracing::info!(user = %user, hub = %handle.unique_id(), "Hub authorized");

    let result = session.ready_loop(&mut reader, &mut outbound_rx).await;
    authorizer.release(&handle);
    tracing::info!(user = %user, hub = %handle.unique_id(), "Hub disconnected");
    result
}

struct Session {
    writer: OwnedWriteHalf,
    encryptor: Aes128Cbc,
    decryptor: Aes128Cbc,
    decoder: FrameDecoder,
    handle: Arc<SessionHandle>,
    events: mpsc::UnboundedSender<HubEvent>,
    user: String,
}

impl Session {
    async fn ready_loop(
        &mut self,
        reader: &mut OwnedReadHalf,
        outbound_rx: &mut mpsc::UnboundedReceiver<Envelope>,
    ) -> anyhow::Result<()> {
        self.send(Envelope::subscribe("status/#")).await?;

        let mut chunk = vec![0u8; 4096];

        loop {
            tokio::select! {
                read = reader.read(&mut chunk) => {
                    let read = read?;

                    if read == 0 {
                        return Ok(());
                    }

                    self.decoder.feed(&chunk[..read]);

                    while let Some(mut frame) = self.decoder.next_frame() {
                        if self.decryptor.decrypt(&mut frame).is_err() {
                            tracing::debug!(hub = %self.handle.unique_id(), "Dropping misaligned record");
                            continue;
                        }

                        match serde_json::from_slice::<Value>(trim_zero_padding(&frame)) {
                            Ok(json) => self.handle_message(&json).await?,
                            Err(_) => {
                                tracing::debug!(hub = %self.handle.unique_id(), "Dropping unparseable record");
                            }
                        }
                    }
                }
                envelope = outbound_rx.recv() => {
                    // The sender lives in our own handle, so this never closes
                    if let Some(envelope) = envelope {
                        self.send(envelope).await?;
                    }
                }
            }
        }
    }

    async fn send(&mut self, envelope: Envelope) -> anyhow::Result<()> {
        let mut buffer = serde_json::to_vec(&envelope)?;
        self.encryptor.encrypt(&mut buffer);
        self.writer.write_all(&codec::encode(&buffer)).await?;
        Ok(())
    }

    async fn handle_message(&mut self, json: &Value) -> anyhow::Result<()> {
        let Some(topic) = json.get("topic").and_then(Value::as_str) else {
            return Ok(());
        };

        let topic = topic.to_owned();
        let message = json
            .get("message")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some(service) = topic.strip_prefix("status/") {
            self.handle_status(service, &message).await?;
        } else if let Some(rest) = topic.strip_prefix("expose/") {
            self.handle_expose(rest, &message).await?;
        } else if let Some(rest) = topic.strip_prefix("device/") {
            self.handle_availability(rest, &message).await;
        } else if let Some(rest) = topic.strip_prefix("fd/") {
            self.handle_data(&topic, rest, &message).await;
        }

        // Unknown topics are ignored
        Ok(())
    }

    /// `status/<service>`: reconcile the device roster for one service.
    async fn handle_status(
        &mut self,
        service: &str,
        message: &Map<String, Value>,
    ) -> anyhow::Result<()> {
        let service_type = service.split('/').next().unwrap_or_default();

        if !SERVICES.contains(&service_type) {
            return Ok(());
        }

        let names = message
            .get("names")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut roster: BTreeMap<String, Device> = BTreeMap::new();

        for item in message
            .get("devices")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
            let removed = item
                .get("removed")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let cloud = item.get("cloud").and_then(Value::as_bool).unwrap_or(true);

            if name.is_empty() || removed || !cloud || name == "HOMEd Coordinator" {
                continue;
            }

            let id = match service_type {
                "zigbee" => value_string(item.get("ieeeAddress")),
                "modbus" => format!(
                    "{}.{}",
                    item.get("portId").and_then(Value::as_i64).unwrap_or(0),
                    item.get("slaveId").and_then(Value::as_i64).unwrap_or(0)
                ),
                _ => value_string(item.get("id")),
            };

            let key = format!("{service_type}/{id}");
            let topic = format!("{service}/{}", if names { name } else { id.as_str() });
            let description = item
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();

            roster.insert(key.clone(), Device::new(&key, &topic, name, description));
        }

        let handle = self.handle.clone();
        let mut outgoing = Vec::new();
        let mut check = false;

        {
            let mut devices = handle.devices.lock().await;

            for (key, incoming) in &roster {
                match devices.get_mut(key) {
                    None => {
                        outgoing.push(Envelope::subscribe(format!("expose/{}", incoming.topic)));
                        outgoing.push(Envelope::subscribe(format!("device/{}", incoming.topic)));
                        devices.insert(key.clone(), incoming.clone());
                        check = true;
                    }
                    Some(existing) => {
                        existing.topic = incoming.topic.clone();
                        existing.name = incoming.name.clone();
                        existing.description = incoming.description.clone();
                    }
                }
            }

            devices.retain(|key, device| {
                if device.topic.starts_with(service) && !roster.contains_key(key) {
                    check = true;
                    false
                } else {
                    true
                }
            });
        }

        for envelope in outgoing {
            self.send(envelope).await?;
        }

        if check {
            let _ = self.events.send(HubEvent::DevicesUpdated {
                user: self.user.clone(),
            });
        }

        Ok(())
    }

    /// `expose/<topic>`: translate exposes into endpoints, subscribe to
    /// telemetry, and nudge the hub into snapshotting current state.
    async fn handle_expose(
        &mut self,
        search: &str,
        message: &Map<String, Value>,
    ) -> anyhow::Result<()> {
        let handle = self.handle.clone();
        let mut outgoing = Vec::new();

        {
            let mut devices = handle.devices.lock().await;

            let Some(device) = device::find_device(&mut devices, search) else {
                return Ok(());
            };

            if !device.endpoints.is_empty() {
                return Ok(());
            }

            for subscription in device.apply_exposes(message) {
                outgoing.push(Envelope::subscribe(subscription));
            }

            let (service, name) = device
                .topic
                .rsplit_once('/')
                .unwrap_or((device.topic.as_str(), device.topic.as_str()));

            outgoing.push(Envelope::publish(
                format!("command/{service}"),
                json!({ "action": "getProperties", "device": name, "service": "cloud" }),
            ));
        }

        for envelope in outgoing {
            self.send(envelope).await?;
        }

        Ok(())
    }

    /// `device/<topic>`: availability flag.
    async fn handle_availability(&mut self, search: &str, message: &Map<String, Value>) {
        let handle = self.handle.clone();
        let mut devices = handle.devices.lock().await;

        if let Some(device) = device::find_device(&mut devices, search) {
            device.available = message.get("status").and_then(Value::as_str) == Some("online");
        }
    }

    /// `fd/<topic>[/<endpoint>]`: telemetry. Routes values into capabilities
    /// and properties and emits the per-endpoint delta upstream.
    async fn handle_data(&mut self, topic: &str, search: &str, message: &Map<String, Value>) {
        let default_endpoint: u8 = topic
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .parse()
            .unwrap_or_default();

        let handle = self.handle.clone();
        let mut delta = Vec::new();

        {
            let mut devices = handle.devices.lock().await;

            let Some(device) = device::find_device(&mut devices, search) else {
                return;
            };

            if !device.apply_update(default_endpoint, message) {
                return;
            }

            let device_key = device.key.clone();

            for endpoint in device.endpoints.values_mut() {
                let mut capabilities = Vec::new();
                let mut properties = Vec::new();

                for index in 0..endpoint.capabilities.len() {
                    if !endpoint.capabilities[index].updated {
                        continue;
                    }

                    endpoint.capabilities[index].updated = false;
                    let state = endpoint.capability_state(index);
                    capabilities.push(json!({
                        "type": endpoint.capabilities[index].wire_type(),
                        "state": state,
                    }));
                }

                for property in endpoint.properties.values_mut() {
                    if !property.updated {
                        continue;
                    }

                    property.updated = false;
                    properties.push(json!({
                        "type": property.wire_type(),
                        "state": property.state(),
                    }));

                    // Edge-triggered events clear once reported
                    if property.instance() == "button" || property.instance() == "vibration" {
                        property.clear_value();
                    }
                }

                if capabilities.is_empty() && properties.is_empty() {
                    continue;
                }

                let mut id = format!("{}/{}", handle.unique_id(), device_key);

                if endpoint.id != 0 {
                    id.push_str(&format!("/{}", endpoint.id));
                }

                delta.push(json!({
                    "id": id,
                    "capabilities": capabilities,
                    "properties": properties,
                }));
            }
        }

        if !delta.is_empty() {
            let _ = self.events.send(HubEvent::DataUpdated {
                user: self.user.clone(),
                devices: delta,
            });
        }
    }
}

fn value_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HubServer;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    /// Hub-side half of the protocol, for driving the server in tests.
    struct FakeHub {
        stream: TcpStream,
        encryptor: Aes128Cbc,
        decryptor: Aes128Cbc,
        decoder: FrameDecoder,
    }

    impl FakeHub {
        async fn connect(addr: std::net::SocketAddr) -> Self {
            let mut stream = TcpStream::connect(addr).await.unwrap();

            let prime = 0xfffffffb;
            let dh = DiffieHellman::new(prime, 5);
            let mut hello = Vec::new();
            hello.extend_from_slice(&prime.to_be_bytes());
            hello.extend_from_slice(&5u32.to_be_bytes());
            hello.extend_from_slice(&dh.public_key().to_be_bytes());
            stream.write_all(&hello).await.unwrap();

            let mut reply = [0u8; 4];
            stream.read_exact(&mut reply).await.unwrap();
            let shared = dh.shared_secret(u32::from_be_bytes(reply));

            Self {
                stream,
                encryptor: Aes128Cbc::from_shared(shared),
                decryptor: Aes128Cbc::from_shared(shared),
                decoder: FrameDecoder::new(),
            }
        }

        async fn send(&mut self, payload: &Value) {
            let mut buffer = serde_json::to_vec(payload).unwrap();
            self.encryptor.encrypt(&mut buffer);
            self.stream
                .write_all(&codec::encode(&buffer))
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> Value {
            loop {
                if let Some(mut frame) = self.decoder.next_frame() {
                    self.decryptor.decrypt(&mut frame).unwrap();
                    return serde_json::from_slice(trim_zero_padding(&frame)).unwrap();
                }

                let mut chunk = vec![0u8; 4096];
                let read = self.stream.read(&mut chunk).await.unwrap();
                assert!(read > 0, "server closed the connection");
                self.decoder.feed(&chunk[..read]);
            }
        }
    }

    struct StubAuthorizer {
        token: Vec<u8>,
        handle: StdMutex<Option<Arc<SessionHandle>>>,
    }

    impl SessionAuthorizer for StubAuthorizer {
        fn authorize(&self, token: &[u8], session: &Arc<SessionHandle>) -> Option<String> {
            if token == self.token {
                *self.handle.lock().unwrap() = Some(session.clone());
                Some("tester".into())
            } else {
                None
            }
        }

        fn release(&self, _session: &Arc<SessionHandle>) {
            self.handle.lock().unwrap().take();
        }
    }

    async fn start_server(
        token: Vec<u8>,
    ) -> (
        std::net::SocketAddr,
        Arc<StubAuthorizer>,
        mpsc::UnboundedReceiver<HubEvent>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let authorizer = Arc::new(StubAuthorizer {
            token,
            handle: StdMutex::new(None),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let server = HubServer::new(authorizer.clone(), events_tx);
        tokio::spawn(async move { server.serve(listener).await });

        (addr, authorizer, events_rx)
    }

    #[tokio::test]
    async fn authorized_hub_gets_status_subscription() {
        let token = vec![7u8; 32];
        let (addr, authorizer, mut events) = start_server(token.clone()).await;

        let mut hub = FakeHub::connect(addr).await;
        hub.send(&json!({ "uniqueId": "hub-1", "token": hex::encode(&token) }))
            .await;

        assert_eq!(
            hub.recv().await,
            json!({ "action": "subscribe", "topic": "status/#" })
        );

        let handle = authorizer.handle.lock().unwrap().clone().unwrap();
        assert_eq!(handle.unique_id(), "hub-1");
        assert_eq!(handle.owner(), Some("tester"));

        // Roster announcement subscribes per device and reports discovery
        hub.send(&json!({
            "topic": "status/zigbee",
            "message": {
                "names": true,
                "devices": [
                    { "name": "Bulb", "ieeeAddress": "0x01", "cloud": true },
                    { "name": "HOMEd Coordinator", "ieeeAddress": "0x00" },
                ],
            },
        }))
        .await;

        assert_eq!(
            hub.recv().await,
            json!({ "action": "subscribe", "topic": "expose/zigbee/Bulb" })
        );
        assert_eq!(
            hub.recv().await,
            json!({ "action": "subscribe", "topic": "device/zigbee/Bulb" })
        );

        match events.recv().await.unwrap() {
            HubEvent::DevicesUpdated { user } => assert_eq!(user, "tester"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_token_closes_the_session() {
        let (addr, _authorizer, _events) = start_server(vec![7u8; 32]).await;

        let mut hub = FakeHub::connect(addr).await;
        hub.send(&json!({ "uniqueId": "hub-1", "token": hex::encode([9u8; 32]) }))
            .await;

        let mut chunk = [0u8; 16];
        assert_eq!(hub.stream.read(&mut chunk).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expose_flow_reaches_publish() {
        let token = vec![1u8; 32];
        let (addr, authorizer, mut events) = start_server(token.clone()).await;

        let mut hub = FakeHub::connect(addr).await;
        hub.send(&json!({ "uniqueId": "hub-2", "token": hex::encode(&token) }))
            .await;
        hub.recv().await; // status/#

        hub.send(&json!({
            "topic": "status/zigbee",
            "message": {
                "names": true,
                "devices": [{ "name": "Bulb", "ieeeAddress": "0x01" }],
            },
        }))
        .await;
        hub.recv().await; // expose/zigbee/Bulb
        hub.recv().await; // device/zigbee/Bulb
        events.recv().await;

        hub.send(&json!({
            "topic": "expose/zigbee/Bulb",
            "message": { "0": { "items": ["light"], "options": { "light": ["level"] } } },
        }))
        .await;

        assert_eq!(
            hub.recv().await,
            json!({ "action": "subscribe", "topic": "fd/zigbee/Bulb" })
        );
        assert_eq!(
            hub.recv().await,
            json!({
                "action": "publish",
                "topic": "command/zigbee",
                "message": { "action": "getProperties", "device": "Bulb", "service": "cloud" },
            })
        );

        // Mark available, push telemetry, expect a state delta
        hub.send(&json!({
            "topic": "device/zigbee/Bulb",
            "message": { "status": "online" },
        }))
        .await;

        hub.send(&json!({
            "topic": "fd/zigbee/Bulb",
            "message": { "status": "on", "level": 128 },
        }))
        .await;

        match events.recv().await.unwrap() {
            HubEvent::DataUpdated { user, devices } => {
                assert_eq!(user, "tester");
                assert_eq!(devices.len(), 1);
                assert_eq!(devices[0]["id"], json!("hub-2/zigbee/0x01"));

                let capabilities = devices[0]["capabilities"].as_array().unwrap();
                assert_eq!(capabilities.len(), 2);
                assert_eq!(
                    capabilities[0]["state"],
                    json!({ "instance": "on", "value": true })
                );
                assert_eq!(
                    capabilities[1]["state"],
                    json!({ "instance": "brightness", "value": 50 })
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // API-side publish folds through the outbound channel in order
        let handle = authorizer.handle.lock().unwrap().clone().unwrap();
        let mut patch = Map::new();
        patch.insert("status".into(), json!("off"));
        handle.publish("zigbee/Bulb", 0, false, patch);

        assert_eq!(
            hub.recv().await,
            json!({
                "action": "publish",
                "topic": "td/zigbee/Bulb",
                "message": { "status": "off" },
            })
        );
    }

    #[test]
    fn numeric_publish_flattens_keys() {
        let (outbound, mut rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            unique_id: "hub".into(),
            owner: OnceLock::new(),
            devices: Mutex::new(BTreeMap::new()),
            outbound,
        };

        let mut patch = Map::new();
        patch.insert("status".into(), json!("on"));
        handle.publish("modbus/relay", 2, true, patch);

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.topic, "td/modbus/relay");
        assert_eq!(
            envelope.message,
            Some(json!({ "status_2": "on" }))
        );

        // Path-addressed endpoints get a topic suffix instead
        let mut patch = Map::new();
        patch.insert("position".into(), json!(50));
        handle.publish("zigbee/curtain", 3, false, patch);

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.topic, "td/zigbee/curtain/3");
        assert_eq!(envelope.message, Some(json!({ "position": 50 })));
    }
}
