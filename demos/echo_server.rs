use flowsock::config::WebSocketConfig;
use flowsock::connection::DataType;
use flowsock::handler::Handler;
use flowsock::message::Message;
use flowsock::server::Server;
use flowsock::worker::ConnectionHandle;
use log::{error, info};

struct Echo;

impl Handler for Echo {
    type UserData = ();

    fn on_open(&self, handle: &ConnectionHandle) {
        info!("connection {} open", handle.id());
    }

    fn on_message(&self, handle: &ConnectionHandle, _user_data: &mut (), message: Message) {
        let (data_type, bytes) = match message {
            Message::Text(text) => (DataType::Text, text.into_bytes()),
            Message::Binary(bytes) => (DataType::Binary, bytes),
        };
        if let Err(e) = handle.send(data_type, bytes) {
            error!("failed to echo message back to {}: {e}", handle.id());
        }
    }

    fn on_close(&self, handle: &ConnectionHandle, _user_data: ()) {
        info!("connection {} closed", handle.id());
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let server = Server::bind("127.0.0.1", 9002, Echo, WebSocketConfig::default())
        .await
        .expect("can't listen");
    info!("listening on: {}", server.local_addr());

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    server.close().await;
}
