// Group Call Server CLI Validation Tool
// Checks a running server by hand: health, room listing, joins and scripted scenarios

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use groupcall_server::media::sdp::SAMPLE_OFFER;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser)]
#[command(name = "groupcall-cli")]
#[command(about = "Group Call Server CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// List rooms and their participants
    Rooms,

    /// Join a room and print every message the server sends
    Join {
        /// Room to join
        #[arg(short, long)]
        room: String,

        /// Participant name
        #[arg(short, long)]
        name: String,

        /// File holding the SDP offer (a built-in audio offer otherwise)
        #[arg(long)]
        sdp_file: Option<String>,

        /// Keep connection alive (press Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },
}

const SCENARIOS: [&str; 3] = ["join", "duplicate-name", "two-party"];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Rooms => {
            list_rooms(&cli.server).await;
        }
        Commands::Join {
            room,
            name,
            sdp_file,
            keep_alive,
        } => {
            join_room(&cli.server, room, name, sdp_file.as_deref(), *keep_alive).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/groupcall/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn list_rooms(server: &str) {
    println!("{}", "Fetching rooms...".cyan());

    let url = format!("http://{}/groupcall/rooms", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<Vec<Value>>().await {
            Ok(rooms) if rooms.is_empty() => println!("  No active rooms"),
            Ok(rooms) => {
                for room in rooms {
                    let members: Vec<&str> = room["participants"]
                        .as_array()
                        .map(|names| names.iter().filter_map(Value::as_str).collect())
                        .unwrap_or_default();
                    println!(
                        "  {} ({}): {}",
                        room["room"].as_str().unwrap_or("?").green().bold(),
                        members.len(),
                        members.join(", ")
                    );
                }
            }
            Err(e) => println!("{} Unreadable response: {}", "✗".red(), e),
        },
        Ok(resp) => println!("{} Rooms fetch failed: {}", "✗".red(), resp.status()),
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

async fn join_room(server: &str, room: &str, name: &str, sdp_file: Option<&str>, keep_alive: bool) {
    println!("{}", "Joining room...".cyan());
    println!("  Room: {}", room);
    println!("  Name: {}", name);

    let sdp_offer = match sdp_file {
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(sdp) => sdp,
            Err(e) => {
                println!("{} Cannot read {}: {}", "✗".red(), path, e);
                return;
            }
        },
        None => SAMPLE_OFFER.to_string(),
    };

    let Some(mut ws) = connect(server).await else {
        return;
    };

    if !send_join(&mut ws, room, name, &sdp_offer).await {
        println!("{} Failed to send joinRoom message", "✗".red());
        return;
    }
    println!("{} joinRoom message sent", "✓".green());
    println!("Waiting for response...");

    // The answer and the participant list arrive back to back
    while let Some(message) = next_json(&mut ws, 5).await {
        print_server_message(&message);
        if message["id"] == "existingParticipants" || message["id"] == "joinRejected" {
            break;
        }
    }

    if keep_alive {
        println!("\n{}", "Connection is being kept alive...".yellow());
        println!("Press {} to leave the room.", "Ctrl+C".bold());

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    let _ = ws.send(Message::Text(json!({"id": "leaveRoom"}).to_string())).await;
                    println!("\n{} Left room {}", "✓".green(), room);
                    break;
                }
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(message) => print_server_message(&message),
                            Err(_) => println!("{} {}", "◀".green(), text.bright_white()),
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        println!("{} Server closed the connection", "✗".yellow());
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        println!("{} Connection error: {}", "✗".red(), e);
                        break;
                    }
                    None => {
                        println!("{} Connection closed", "✗".yellow());
                        break;
                    }
                }
            }
        }
    } else {
        println!("\n{}", "⚠ Note: Connection closed. You have left the room.".yellow());
        println!("Use {} to stay in the room.", "--keep-alive".cyan());
    }
}

fn print_server_message(message: &Value) {
    match message["id"].as_str() {
        Some("answer_sdp") => println!("{} SDP answer received", "◀".green()),
        Some("existingParticipants") => {
            println!("{} Existing participants: {}", "◀".green(), message["data"])
        }
        Some("newParticipantArrived") => {
            println!("{} {} arrived", "◀".green(), message["name"].as_str().unwrap_or("?").bold())
        }
        Some("participantLeft") => {
            println!("{} {} left", "◀".yellow(), message["name"].as_str().unwrap_or("?").bold())
        }
        Some("joinRejected") => println!("{} Join rejected: {}", "✗".red(), message["message"]),
        _ => println!("{} {}", "◀".green(), message.to_string().bright_white()),
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Join gets an answer and an empty participant list", "join".cyan());
    println!("  {} - A second participant with the same name is rejected", "duplicate-name".cyan());
    println!("  {} - Arrivals and departures reach the other participant", "two-party".cyan());
    println!("\nExample: groupcall-cli validate --scenario two-party");
}

async fn run_validation(server: &str, scenario: &str) -> Option<bool> {
    let result = match scenario {
        "join" => validate_join(server).await,
        "duplicate-name" => validate_duplicate_name(server).await,
        "two-party" => validate_two_party(server).await,
        _ => return None,
    };
    Some(result)
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    match run_validation(server, scenario).await {
        Some(true) => println!("\n{} Scenario passed", "✓".green().bold()),
        Some(false) => println!("\n{} Scenario failed", "✗".red().bold()),
        None => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
        }
    }
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let mut passed = 0;
    let mut failed = 0;

    for scenario in SCENARIOS {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        if run_validation(server, scenario).await == Some(true) {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(500)).await;
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} Passed: {}", "✓".green(), passed.to_string().green());
    println!("  {} Failed: {}", "✗".red(), failed.to_string().red());
    println!("  Total: {}", passed + failed);

    if failed == 0 {
        println!("\n{}", "All validations passed! 🎉".green().bold());
    } else {
        println!("\n{}", "Some validations failed. Check output above.".yellow());
    }
}

async fn validate_join(server: &str) -> bool {
    let room = scratch_room();
    let Some(mut ws) = connect(server).await else {
        return false;
    };

    if !send_join(&mut ws, &room, "validator", SAMPLE_OFFER).await {
        println!("{} Failed to send message", "✗".red());
        return false;
    }

    let answer = next_json(&mut ws, 3).await;
    if !matches!(&answer, Some(m) if m["id"] == "answer_sdp") {
        println!("{} Expected answer_sdp, got {:?}", "✗".red(), answer);
        return false;
    }
    println!("{} SDP answer received", "✓".green());

    let list = next_json(&mut ws, 3).await;
    match list {
        Some(m) if m["id"] == "existingParticipants" && m["data"] == json!([]) => {
            println!("{} Empty participant list received", "✓".green());
            true
        }
        other => {
            println!("{} Expected empty existingParticipants, got {:?}", "✗".red(), other);
            false
        }
    }
}

async fn validate_duplicate_name(server: &str) -> bool {
    let room = scratch_room();
    let (Some(mut first), Some(mut second)) = (connect(server).await, connect(server).await) else {
        return false;
    };

    if !send_join(&mut first, &room, "validator", SAMPLE_OFFER).await {
        return false;
    }
    drain_join_replies(&mut first).await;

    if !send_join(&mut second, &room, "validator", SAMPLE_OFFER).await {
        return false;
    }
    match next_json(&mut second, 3).await {
        Some(m) if m["id"] == "joinRejected" => {
            println!("{} Duplicate rejected: {}", "✓".green(), m["message"]);
            true
        }
        other => {
            println!("{} Expected joinRejected, got {:?}", "✗".red(), other);
            false
        }
    }
}

async fn validate_two_party(server: &str) -> bool {
    let room = scratch_room();
    let (Some(mut alice), Some(mut bob)) = (connect(server).await, connect(server).await) else {
        return false;
    };

    if !send_join(&mut alice, &room, "alice", SAMPLE_OFFER).await {
        return false;
    }
    drain_join_replies(&mut alice).await;

    if !send_join(&mut bob, &room, "bob", SAMPLE_OFFER).await {
        return false;
    }
    let bob_list = drain_join_replies(&mut bob).await;
    if bob_list != Some(json!(["alice"])) {
        println!("{} bob should see [\"alice\"], got {:?}", "✗".red(), bob_list);
        return false;
    }
    println!("{} bob sees alice", "✓".green());

    match next_json(&mut alice, 3).await {
        Some(m) if m["id"] == "newParticipantArrived" && m["name"] == "bob" => {
            println!("{} alice notified of bob", "✓".green());
        }
        other => {
            println!("{} Expected newParticipantArrived, got {:?}", "✗".red(), other);
            return false;
        }
    }

    if bob.close(None).await.is_err() {
        println!("{} Failed to close bob's connection", "✗".yellow());
    }

    match next_json(&mut alice, 3).await {
        Some(m) if m["id"] == "participantLeft" && m["name"] == "bob" => {
            println!("{} alice notified that bob left", "✓".green());
            true
        }
        other => {
            println!("{} Expected participantLeft, got {:?}", "✗".red(), other);
            false
        }
    }
}

fn scratch_room() -> String {
    format!("validate-{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

async fn connect(server: &str) -> Option<WsStream> {
    let url = format!("ws://{}/groupcall", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => Some(ws_stream),
        Err(e) => {
            println!("{} Cannot connect to {}: {}", "✗".red(), url, e);
            None
        }
    }
}

async fn send_join(ws: &mut WsStream, room: &str, name: &str, sdp_offer: &str) -> bool {
    let msg = json!({
        "id": "joinRoom",
        "name": name,
        "room": room,
        "sdpOffer": sdp_offer,
    });
    ws.send(Message::Text(msg.to_string())).await.is_ok()
}

/// Reads the answer and participant list that follow a join. Returns the
/// listed names.
async fn drain_join_replies(ws: &mut WsStream) -> Option<Value> {
    while let Some(message) = next_json(ws, 3).await {
        if message["id"] == "existingParticipants" {
            return Some(message["data"].clone());
        }
    }
    None
}

/// Next text frame as JSON, skipping control frames
async fn next_json(ws: &mut WsStream, secs: u64) -> Option<Value> {
    loop {
        match timeout(Duration::from_secs(secs), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return None,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Error receiving message: {}", "✗".red(), e);
                return None;
            }
            Err(_) => return None,
        }
    }
}
