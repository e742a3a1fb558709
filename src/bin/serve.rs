//! Development server for the Kolibri bridge
//!
//! A minimal static file server. Its one load-bearing detail is the
//! `application/wasm` content type on `kolibri.wasm`: without it the
//! browser's `WebAssembly.instantiateStreaming` path fails and the bridge
//! falls back to the slower ArrayBuffer path on every page load.

use std::fs;
use std::path::{Path, PathBuf};
use tiny_http::{Header, Response, Server};

const DEFAULT_PORT: u16 = 8080;

fn main() {
    let mut args = std::env::args().skip(1);
    let port: u16 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let root = PathBuf::from(args.next().unwrap_or_else(|| ".".to_string()));

    let addr = format!("0.0.0.0:{}", port);
    let server = Server::http(&addr).expect("Failed to start server");

    println!("kolibri-bridge dev server");
    println!("  serving {} at http://localhost:{}", root.display(), port);
    println!("  kolibri.wasm is served as application/wasm");

    for request in server.incoming_requests() {
        let url_path = request.url().to_string();
        let relative = if url_path == "/" {
            "index.html".to_string()
        } else {
            url_path.trim_start_matches('/').to_string()
        };

        let response = serve_file(&root.join(relative));
        let _ = request.respond(response);
    }
}

fn serve_file(path: &Path) -> Response<std::io::Cursor<Vec<u8>>> {
    match fs::read(path) {
        Ok(contents) => {
            let mime = mime_type(path);
            let header = Header::from_bytes("Content-Type", mime).expect("static mime header");
            Response::from_data(contents).with_header(header)
        }
        Err(_) => Response::from_string("404 Not Found")
            .with_status_code(404)
            .with_header(Header::from_bytes("Content-Type", "text/plain").expect("static header")),
    }
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("wasm") => "application/wasm",
        Some("txt") => "text/plain; charset=utf-8",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
