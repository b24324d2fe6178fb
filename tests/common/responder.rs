//! Loopback HTTP responder
//!
//! Answers each connection once from a fixed route table and records what
//! it received, so headers and bodies can be asserted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use mediasync::Config;

#[derive(Debug, Clone)]
pub struct Recorded {
	pub method: String,
	pub path: String,
	pub headers: HashMap<String, String>,
	pub body: Vec<u8>,
}

pub type Routes = HashMap<(&'static str, &'static str), (u16, String)>;

pub struct Responder {
	pub base: String,
	requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Responder {
	pub async fn start(routes: Routes) -> Responder {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let base = format!("http://{}", listener.local_addr().unwrap());
		let requests = Arc::new(Mutex::new(Vec::new()));
		let recorded = requests.clone();
		let routes = Arc::new(routes);
		tokio::spawn(async move {
			loop {
				let (stream, _) = match listener.accept().await {
					Ok(conn) => conn,
					Err(_) => return,
				};
				let routes = routes.clone();
				let recorded = recorded.clone();
				tokio::spawn(async move {
					let _ = serve_one(stream, &routes, &recorded).await;
				});
			}
		});
		Responder { base, requests }
	}

	pub fn requests(&self) -> Vec<Recorded> {
		self.requests.lock().unwrap().clone()
	}

	pub fn config(&self) -> Config {
		Config {
			server: format!("{}/", self.base),
			key: "test-key".to_string(),
			request_timeout_secs: 5,
			..Config::default()
		}
	}
}

async fn serve_one(
	stream: TcpStream,
	routes: &Routes,
	recorded: &Mutex<Vec<Recorded>>,
) -> std::io::Result<()> {
	let mut reader = BufReader::new(stream);
	let mut line = String::new();
	reader.read_line(&mut line).await?;
	let mut parts = line.split_whitespace();
	let method = parts.next().unwrap_or_default().to_string();
	let path = parts.next().unwrap_or_default().to_string();

	let mut headers = HashMap::new();
	loop {
		let mut h = String::new();
		reader.read_line(&mut h).await?;
		let h = h.trim_end();
		if h.is_empty() {
			break;
		}
		if let Some((k, v)) = h.split_once(':') {
			headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
		}
	}

	let mut body = Vec::new();
	if let Some(len) = headers.get("content-length").and_then(|v| v.parse::<usize>().ok()) {
		body.resize(len, 0);
		reader.read_exact(&mut body).await?;
	} else if headers.get("transfer-encoding").map(|v| v.contains("chunked")).unwrap_or(false) {
		loop {
			let mut size_line = String::new();
			reader.read_line(&mut size_line).await?;
			let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
			let mut chunk = vec![0; size + 2];
			reader.read_exact(&mut chunk).await?;
			if size == 0 {
				break;
			}
			body.extend_from_slice(&chunk[..size]);
		}
	}

	let (status, payload) = routes
		.iter()
		.find(|((m, p), _)| *m == method && *p == path)
		.map(|(_, resp)| resp.clone())
		.unwrap_or((404, "not found".to_string()));
	recorded.lock().unwrap().push(Recorded { method, path, headers, body });

	let response = format!(
		"HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
		status,
		payload.len(),
		payload
	);
	let mut stream = reader.into_inner();
	stream.write_all(response.as_bytes()).await?;
	stream.shutdown().await
}

pub fn routes(list: &[(&'static str, &'static str, u16, &str)]) -> Routes {
	list.iter().map(|(m, p, s, b)| ((*m, *p), (*s, b.to_string()))).collect()
}

// vim: ts=4
