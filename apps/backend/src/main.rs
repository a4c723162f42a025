use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use backend::middleware::{RequestTrace, StructuredLogger, TraceSpan};
use backend::routes;
use backend::state::AppState;
use db_infra::{migrate_on_startup, ConnectionSettings, DevDbResource, EngineRegistry};

mod telemetry;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    telemetry::init_tracing();

    let host = std::env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("BACKEND_PORT")
        .unwrap_or_else(|_| "8000".to_string())
        .parse::<u16>()
        .unwrap_or_else(|_| {
            eprintln!("❌ BACKEND_PORT must be a valid port number");
            std::process::exit(1);
        });

    let settings = ConnectionSettings::from_env().unwrap_or_else(|e| {
        eprintln!("❌ Invalid database settings: {e}");
        std::process::exit(1);
    });
    let local_db = DevDbResource::from_env();

    if let Err(e) = migrate_on_startup(&settings, &local_db).await {
        eprintln!("❌ Migrations failed: {e}");
        std::process::exit(1);
    }

    let registry = match EngineRegistry::init(&settings, &local_db).await {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            eprintln!("❌ Failed to configure database engines: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = registry.init_db().await {
        eprintln!("❌ Database health check failed: {e}");
        registry.close_db().await;
        std::process::exit(1);
    }
    println!("✅ Database connected");

    println!("🚀 Starting backend on http://{}:{}", host, port);

    let data = web::Data::new(AppState::new(Arc::clone(&registry)));
    let server = HttpServer::new(move || {
        App::new()
            .wrap(StructuredLogger)
            .wrap(TraceSpan)
            .wrap(RequestTrace)
            .app_data(data.clone())
            .configure(routes::configure)
    })
    .bind((host.as_str(), port))?
    .run();

    let result = server.await;
    registry.close_db().await;
    result
}
