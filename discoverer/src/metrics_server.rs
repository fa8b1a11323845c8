//! A `/metrics` endpoint with no web framework: a blocking
//! `std::net::TcpListener` on its own OS thread, one request served at a
//! time, since this process serves one scraper every fifteen-odd seconds.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};

pub fn spawn(addr: SocketAddr) -> anyhow::Result<std::thread::JoinHandle<()>> {
    let listener = TcpListener::bind(addr)?;
    tracing::info!(%addr, "metrics endpoint listening");
    Ok(std::thread::Builder::new()
        .name("discoverer-metrics".to_owned())
        .spawn(move || serve(listener))
        .expect("failed to spawn metrics thread"))
}

fn serve(listener: TcpListener) {
    for conn in listener.incoming() {
        let Ok(mut stream) = conn else { continue };
        let mut discard = [0u8; 1024];
        let _ = stream.read(&mut discard);
        let body = discoverer_core::metrics::render();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes());
    }
}
