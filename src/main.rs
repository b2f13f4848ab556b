//! `rawhttp` command line: run an echo server or send a single request.

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use rawhttp::config::{load_config, Config};
use rawhttp::http::headers::CONTENT_TYPE;
use rawhttp::lifecycle::signals;
use rawhttp::observability::logging;
use rawhttp::{Client, Headers, Method, Request, Response, Server, SocketClient, Status};

#[derive(Parser)]
#[command(name = "rawhttp")]
#[command(about = "HTTP/1.1 server and client on raw sockets", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an echo server until Ctrl-C
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Send one request and print the response
    Send {
        /// Base URL, e.g. http://127.0.0.1:8090
        url: String,

        /// Request path including query
        #[arg(default_value = "/")]
        path: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Header as `name: value`, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    logging::init(&config.observability.log_level);

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Send {
            url,
            path,
            method,
            headers,
            data,
        } => send(config, &url, &path, &method, &headers, data).await,
    }
}

async fn serve(mut config: Config, bind: Option<String>) -> Result<(), Box<dyn Error>> {
    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }

    let mut server = Server::bind(config.server, echo).await?;
    tracing::info!(address = %server.local_addr(), "Echo server listening");

    signals::wait_for_signal().await;
    server.close().await;

    tracing::info!(
        connections_established = server.connections_established(),
        "Shutdown complete"
    );
    Ok(())
}

/// Reply with the request body and content type.
async fn echo(request: Request) -> Response {
    match request.body() {
        Some(body) => {
            let media_type = request.headers().first(CONTENT_TYPE).unwrap_or("text/plain");
            Response::new(Status::Ok).with_body(body.to_vec(), media_type)
        }
        None => Response::new(Status::Ok),
    }
}

async fn send(
    config: Config,
    url: &str,
    path: &str,
    method: &str,
    headers: &[String],
    data: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let method: Method = method
        .parse()
        .map_err(|_| format!("unsupported method {method:?}"))?;

    let mut pairs = Vec::with_capacity(headers.len());
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("header {header:?} is not `name: value`"))?;
        pairs.push((name.trim().to_string(), value.trim().to_string()));
    }
    let mut header_map = Headers::from_pairs(pairs);

    let mut request = Request::new(method, path);
    if let Some(data) = data {
        header_map = header_map.with_content_length(data.len());
        request = request.with_body(data);
    }
    let request = request.with_headers(header_map);

    let client = SocketClient::new(&config.client)?;
    let result = client.exchange(url, request).await;
    client.close().await;
    let response = result?;

    println!("{}", response.status());
    for (name, values) in response.headers().iter() {
        println!("{}: {}", name, values.join(", "));
    }
    if let Some(body) = response.body_text() {
        println!();
        println!("{body}");
    }
    Ok(())
}
