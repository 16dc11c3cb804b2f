#[actix::main]
async fn main() -> std::io::Result<()> {
    ptt_signal_srv::server::http::start().await
}
