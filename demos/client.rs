use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use flowsock::client::Client;
use flowsock::close::CloseCode;
use flowsock::config::WebSocketConfig;
use flowsock::connection::DataType;
use flowsock::handler::Handler;
use flowsock::message::Message;
use flowsock::worker::ConnectionHandle;
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::time::{interval, Duration};

struct Counter {
    received: Arc<AtomicU32>,
}

impl Handler for Counter {
    type UserData = ();

    fn on_open(&self, _handle: &ConnectionHandle) {}

    fn on_message(&self, _handle: &ConnectionHandle, _user_data: &mut (), message: Message) {
        if let Message::Text(text) = message {
            println!("Received message: {text}");
        }
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    fn on_close(&self, _handle: &ConnectionHandle, _user_data: ()) {}
}

#[tokio::main]
async fn main() {
    let received = Arc::new(AtomicU32::new(0));
    let handler = Counter {
        received: received.clone(),
    };

    let client = Client::connect("127.0.0.1", 9002, "/", handler, WebSocketConfig::default())
        .await
        .unwrap_or_else(|err| panic!("error when performing handshake: {err}"));

    let mut ticker = interval(Duration::from_secs(5));
    loop {
        ticker.tick().await;

        let random_string = generate_random_string();
        if client.send(DataType::Text, random_string.into_bytes()).is_err() {
            eprintln!("failed to send message");
            break;
        }

        // Give the echo a moment to arrive before checking whether we've
        // reached the close threshold.
        tokio::time::sleep(Duration::from_millis(200)).await;
        if received.load(Ordering::SeqCst) >= 3 {
            client.close(CloseCode::NORMAL);
            break;
        }
    }

    client.closed().await;
}

fn generate_random_string() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}
