use std::time::{Duration, Instant};

use flowsock::client::Client;
use flowsock::config::WebSocketConfig;
use flowsock::connection::DataType;
use flowsock::handler::Handler;
use flowsock::message::Message;
use flowsock::worker::ConnectionHandle;
use tokio::sync::mpsc;

/// Forwards every completed message back to the load generator's main loop
/// over an unbounded channel, so a blocking `send` + await-the-echo round
/// trip can be driven from outside the connection's own worker task.
struct EchoHandler {
    replies: mpsc::UnboundedSender<Message>,
}

impl Handler for EchoHandler {
    type UserData = ();

    fn on_open(&self, _handle: &ConnectionHandle) {}

    fn on_message(&self, _handle: &ConnectionHandle, _user_data: &mut (), message: Message) {
        let _ = self.replies.send(message);
    }

    fn on_close(&self, _handle: &ConnectionHandle, _user_data: ()) {}
}

#[tokio::main]
async fn main() {
    let host = "127.0.0.1";
    let port = 9002;
    let connection_count = 100; // Number of WebSocket clients
    let message_count = 1000; // Messages per client
    let message_size = 16384; // Size of each message in bytes

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    for _ in 0..connection_count {
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
            let handler = EchoHandler { replies: reply_tx };
            let client = Client::connect(host, port, "/", handler, WebSocketConfig::default())
                .await
                .expect("handshake failed");

            let payload = vec![b'a'; message_size];
            let start = Instant::now();

            for _ in 0..message_count {
                client
                    .send(DataType::Binary, payload.clone())
                    .expect("send failed");
                reply_rx.recv().await.expect("connection closed before reply arrived");
            }

            let _ = done_tx.send(start.elapsed());
        });
    }

    drop(done_tx);

    let mut total_duration = Duration::new(0, 0);
    let mut completed: u32 = 0;
    while let Some(duration) = done_rx.recv().await {
        total_duration += duration;
        completed += 1;
    }

    let avg_latency = total_duration / (completed * message_count as u32);
    println!("Average Latency: {:?}", avg_latency);
}
