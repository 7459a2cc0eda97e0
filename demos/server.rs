//
//  Sample application.
//
//  Listens on localhost:4918, plain http, no ssl.
//  Connect to http://localhost:4918/
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::str::FromStr;

use clap::Parser;

use davserve::{DavHandler, FileSystem, LockSystem};

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// local directory to serve (defaults to an in-memory filesystem)
    #[arg(short, long)]
    dir: Option<String>,
    /// URL prefix to strip from request paths
    #[arg(long, default_value = "")]
    prefix: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let Cli { port, dir, prefix } = Cli::parse();

    let fs = match dir.as_deref() {
        Some(dir) => FileSystem::local(dir),
        None => FileSystem::Mem,
    };
    let name = dir.unwrap_or_else(|| "memory filesystem".to_string());

    let dav_server = DavHandler::builder(fs)
        .strip_prefix(prefix)
        .locksystem(LockSystem::Mem)
        .logger(|req, err| match err {
            Some(err) => log::info!("{} {}: {}", req.method(), req.uri(), err),
            None => log::info!("{} {}", req.method(), req.uri()),
        })
        .build();

    let make_service = hyper::service::make_service_fn(move |_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { Ok::<_, Infallible>(dav_server.handle(req).await) }
            };
            Ok::<_, Infallible>(hyper::service::service_fn(func))
        }
    });

    let addr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))?;

    println!("Serving {} on {}", name, addr);
    let _ = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .await
        .map_err(|e| eprintln!("server error: {}", e));
    Ok(())
}
