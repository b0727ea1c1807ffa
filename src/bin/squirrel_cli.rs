use std::{error::Error, io, process, thread, time::Duration};

use clap::Parser;
use log::debug;
use serde::Serialize;
use squirreldb::{Client, ClientError, ClientOptions, Command, prompt};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,
    /// Server port
    #[arg(long, default_value_t = 8082)]
    port: u16,
    /// Authentication token presented during the handshake
    #[arg(long, default_value = "")]
    token: String,
    /// Ask the server for JSON instead of MessagePack
    #[arg(long)]
    json: bool,
    /// Request timeout in milliseconds; 0 waits indefinitely
    #[arg(long, default_value_t = 0)]
    timeout_ms: u64,
}

impl From<Cli> for ClientOptions {
    fn from(cli: Cli) -> Self {
        ClientOptions {
            auth_token: cli.token,
            use_msgpack: !cli.json,
            request_timeout: (cli.timeout_ms > 0).then(|| Duration::from_millis(cli.timeout_ms)),
            ..ClientOptions::new(cli.host, cli.port)
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let options = ClientOptions::from(Cli::parse());
    let client = Client::connect(&options)?;
    println!(
        "connected to {} (session {}, {:?})",
        options.address(),
        client.session_id(),
        client.encoding()
    );

    let interrupted = client.clone();
    ctrlc::set_handler(move || {
        interrupted.close();
        process::exit(130);
    })?;

    let mut subscription: Option<String> = None;
    loop {
        let cmd = match prompt(io::stdin().lock(), io::stdout().lock())? {
            Ok(cmd) => cmd,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        if cmd == Command::Exit {
            break;
        }

        if let Err(e) = execute(&client, cmd, &mut subscription) {
            eprintln!("error: {e}");
            if matches!(e, ClientError::Closed) {
                break;
            }
        }
    }

    client.close();
    Ok(())
}

fn execute(
    client: &Client,
    cmd: Command,
    subscription: &mut Option<String>,
) -> Result<(), ClientError> {
    match cmd {
        Command::Exit => {}
        Command::Ping => {
            client.ping()?;
            println!("pong");
        }
        Command::Collections => print_json(&client.list_collections()?),
        Command::Query(text) => print_json(&client.query(text)?),
        Command::Insert {
            collection,
            document,
        } => print_json(&client.insert(&collection, &document)?),
        Command::Update {
            collection,
            id,
            document,
        } => print_json(&client.update(&collection, &id, &document)?),
        Command::Delete { collection, id } => print_json(&client.delete(&collection, &id)?),
        Command::Subscribe(query) => {
            if let Some(id) = subscription.take() {
                client.unsubscribe(&id)?;
            }
            let sub = client.subscribe(query)?;
            let id = sub.id().to_string();
            println!("subscribed ({id})");

            let printer = thread::Builder::new()
                .name(format!("subscription-{id}"))
                .spawn(move || {
                    for event in &sub {
                        print_json(&event);
                    }
                    debug!("subscription {} ended", sub.id());
                });
            match printer {
                Ok(_) => *subscription = Some(id),
                Err(e) => {
                    eprintln!("failed to start event printer: {e}");
                    client.unsubscribe(&id)?;
                }
            }
        }
        Command::Unsubscribe => match subscription.take() {
            Some(id) => {
                client.unsubscribe(&id)?;
                println!("unsubscribed ({id})");
            }
            None => println!("no active subscription"),
        },
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to render result: {e}"),
    }
}
