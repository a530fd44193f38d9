//! Small interactive demo of `cashu-wallet-core`, mirroring the reference
//! wallet's `bcr-core-cli` REPL shape (`parse_action`/`match` loop over
//! stdin) (spec §9). Not meant as a production wallet frontend.
// ----- standard library imports
use std::io::{self, Write};
use std::sync::Arc;
// ----- extra library imports
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
// ----- local imports
use cashu_wallet_core::{
    config::Config,
    http_mint_client::HttpMintClient,
    secure_store::FileSecureStore,
    token::{self, TokenVersion},
    wallet::Wallet,
};
use cashu_wallet_persistence::{RedbCounterStore, RedbProofStore};

// ----- end imports

enum Action {
    Initialize,
    Balance,
    RequestMint(u64),
    Mint(String, u64),
    Send(u64),
    Receive(String),
    Melt(String),
    Sync,
    Exit,
    Invalid,
}

fn setup_tracing() {
    tracing_subscriber::fmt().with_max_level(LevelFilter::INFO).init();
}

fn print_help() {
    println!("> init");
    println!("> balance");
    println!("> request_mint <amount>");
    println!("> mint <quote_id> <amount>");
    println!("> send <amount>");
    println!("> receive <token>");
    println!("> melt <payment_request>");
    println!("> sync");
    println!("> exit");
}

fn parse_action() -> Action {
    print!("> ");
    io::stdout().flush().ok();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    let mut parts = input.split_whitespace();
    let cmd = parts.next().unwrap_or("");

    match cmd {
        "exit" => Action::Exit,
        "init" => Action::Initialize,
        "balance" => Action::Balance,
        "sync" => Action::Sync,
        "request_mint" => {
            let amount = parts
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or_else(|| panic!("request_mint requires an amount"));
            Action::RequestMint(amount)
        }
        "mint" => {
            let quote_id = parts
                .next()
                .unwrap_or_else(|| panic!("mint requires a quote id"))
                .to_string();
            let amount = parts
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or_else(|| panic!("mint requires an amount"));
            Action::Mint(quote_id, amount)
        }
        "send" => {
            let amount = parts
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or_else(|| panic!("send requires an amount"));
            Action::Send(amount)
        }
        "receive" => {
            let token = parts
                .next()
                .unwrap_or_else(|| panic!("receive requires a token string"))
                .to_string();
            Action::Receive(token)
        }
        "melt" => {
            let request = parts
                .next()
                .unwrap_or_else(|| panic!("melt requires a payment request"))
                .to_string();
            Action::Melt(request)
        }
        _ => Action::Invalid,
    }
}

async fn run_wallet(wallet: &Wallet) {
    print_help();
    loop {
        match parse_action() {
            Action::Initialize => match wallet.initialize(None, None).await {
                Ok(()) => info!("wallet initialized"),
                Err(e) => info!(error = %e, "initialize failed"),
            },
            Action::Balance => match wallet.balance().await {
                Ok(amount) => info!(amount, "balance"),
                Err(e) => info!(error = %e, "balance failed"),
            },
            Action::Sync => match wallet.sync().await {
                Ok(()) => info!("sync complete"),
                Err(e) => info!(error = %e, "sync failed"),
            },
            Action::RequestMint(amount) => match wallet.request_mint_quote(amount, "bolt11").await {
                Ok(quote) => info!(quote_id = %quote.quote_id, request = %quote.request, "mint quote requested"),
                Err(e) => info!(error = %e, "request_mint failed"),
            },
            Action::Mint(quote_id, amount) => match wallet.mint(&quote_id, amount, "bolt11").await {
                Ok(proofs) => info!(count = proofs.len(), "minted"),
                Err(e) => info!(error = %e, "mint failed"),
            },
            Action::Send(amount) => match wallet.send(amount, None).await {
                Ok(cashu_token) => match token::serialize(&cashu_token, TokenVersion::V4, true) {
                    Ok(encoded) => info!(token = %encoded, "send complete"),
                    Err(e) => info!(error = %e, "failed to encode token"),
                },
                Err(e) => info!(error = %e, "send failed"),
            },
            Action::Receive(raw) => match token::deserialize(&raw) {
                Ok(cashu_token) => match wallet.receive(&cashu_token).await {
                    Ok(proofs) => info!(count = proofs.len(), "received"),
                    Err(e) => info!(error = %e, "receive failed"),
                },
                Err(e) => info!(error = %e, "failed to decode token"),
            },
            Action::Melt(request) => match wallet.melt(&request, "bolt11").await {
                Ok(outcome) => info!(state = ?outcome.state, change = outcome.change_proofs.len(), "melt complete"),
                Err(e) => info!(error = %e, "melt failed"),
            },
            Action::Exit => {
                info!("exiting");
                break;
            }
            Action::Invalid => print_help(),
        }
    }
}

#[tokio::main]
async fn main() {
    setup_tracing();

    let config = Config::load().expect("failed to load configuration");
    info!(mint_url = %config.mint_url, "cashu wallet cli");

    std::fs::create_dir_all(&config.storage_dir).expect("failed to create storage directory");

    let mint_client = Arc::new(HttpMintClient::new(&config).expect("failed to build mint client"));
    let proof_store = Arc::new(
        RedbProofStore::open(config.storage_dir.join("proofs.redb")).expect("failed to open proof store"),
    );
    let counter_store = Arc::new(
        RedbCounterStore::open(config.storage_dir.join("counters.redb")).expect("failed to open counter store"),
    );
    let secure_store = Arc::new(FileSecureStore::new(config.storage_dir.clone(), config.password.clone()));

    let wallet = Wallet::new(config, mint_client, proof_store, counter_store, secure_store);
    run_wallet(&wallet).await;
}
