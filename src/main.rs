#[rocket::main]
async fn main() {
    if let Err(e) = commerce_gateway::rocket().launch().await {
        eprintln!("gateway failed to launch: {e}");
        std::process::exit(1);
    }
}
