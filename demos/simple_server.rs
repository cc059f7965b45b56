use flowsock::config::WebSocketConfig;
use flowsock::connection::DataType;
use flowsock::handler::Handler;
use flowsock::message::Message;
use flowsock::server::Server;
use flowsock::worker::ConnectionHandle;
use log::{error, info};

struct Logger;

impl Handler for Logger {
    type UserData = ();

    fn on_open(&self, handle: &ConnectionHandle) {
        info!("new client {} connected", handle.id());
    }

    fn on_message(&self, handle: &ConnectionHandle, _user_data: &mut (), message: Message) {
        info!("message from client {}: {:?}", handle.id(), message);
        let (data_type, bytes) = match message {
            Message::Text(text) => (DataType::Text, text.into_bytes()),
            Message::Binary(bytes) => (DataType::Binary, bytes),
        };
        if let Err(e) = handle.send(data_type, bytes) {
            error!("error occurred for client {}: {e}", handle.id());
        }
    }

    fn on_close(&self, handle: &ConnectionHandle, _user_data: ()) {
        info!("client {} disconnected", handle.id());
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let port: u16 = 8080;
    match Server::bind("127.0.0.1", port, Logger, WebSocketConfig::default()).await {
        Ok(server) => {
            info!("server started on address 127.0.0.1:{port}");
            tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
            server.close().await;
        }
        Err(err) => {
            eprintln!("could not start the server due to: {err:?}");
        }
    }
}
