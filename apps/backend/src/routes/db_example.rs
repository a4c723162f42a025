//! Example routes exercising both session kinds.

use actix_web::{web, HttpResponse};
use db_infra::{AsyncSession, DbInfraError, SyncSession};
use futures_util::FutureExt;
use sea_orm::{DatabaseBackend, Statement};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::AppError;
use crate::extractors::{AsyncDb, Db};
use crate::state::AppState;

const SAMPLE_ROW_SQL: &str = "SELECT 1 AS id, 'Example 1' AS name";
const INSERT_SQL: &str = "INSERT INTO examples (name) VALUES ($1) RETURNING id";
const DEFAULT_NAME: &str = "New example";
const ERR_NO_RETURNED_ROW: &str = "insert returned no row";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Example {
    pub id: String,
    pub name: String,
}

impl Example {
    fn new(id: impl ToString, name: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NewExample {
    #[serde(default)]
    pub name: Option<String>,
}

impl NewExample {
    fn name_or_default(self) -> String {
        self.name.unwrap_or_else(|| DEFAULT_NAME.to_string())
    }
}

/// The sample row followed by the two static rows.
fn with_static_examples(mut rows: Vec<Example>, prefix: &str) -> Vec<Example> {
    rows.push(Example::new(2, format!("{prefix} 2")));
    rows.push(Example::new(3, format!("{prefix} 3")));
    rows
}

/// `INSERT ... RETURNING` always yields a row; treat its absence as a failed statement.
fn returned_row<T>(row: Option<T>) -> Result<T, DbInfraError> {
    row.ok_or_else(|| DbInfraError::query(ERR_NO_RETURNED_ROW))
}

async fn db_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "online",
        "stats": state.db.get_db_stats(),
    }))
}

fn select_sample_sync(session: &mut SyncSession) -> Result<Vec<Example>, AppError> {
    let rows = session.query(SAMPLE_ROW_SQL, &[])?;
    Ok(rows
        .iter()
        .map(|row| Example::new(row.get::<_, i32>("id"), row.get::<_, String>("name")))
        .collect())
}

async fn list_examples(db: Db) -> Result<HttpResponse, AppError> {
    let rows = db.run(select_sample_sync).await?;
    Ok(HttpResponse::Ok().json(with_static_examples(rows, "Example")))
}

fn insert_sync(session: &mut SyncSession, name: String) -> Result<Example, AppError> {
    let inserted = session
        .query(INSERT_SQL, &[&name])
        .and_then(|rows| {
            let id: i32 = returned_row(rows.first())?.try_get("id")?;
            session.commit()?;
            Ok(id)
        });

    match inserted {
        Ok(id) => Ok(Example::new(id, name)),
        Err(e) => {
            if let Err(rollback) = session.rollback() {
                debug!(error = %rollback, "rollback after failed insert also failed");
            }
            Err(e.into())
        }
    }
}

async fn create_example(
    db: Db,
    body: Option<web::Json<NewExample>>,
) -> Result<HttpResponse, AppError> {
    let name = body.map(web::Json::into_inner).unwrap_or_default().name_or_default();
    let example = db.run(move |session| insert_sync(session, name)).await?;
    Ok(HttpResponse::Ok().json(example))
}

async fn select_sample_async(session: &mut AsyncSession) -> Result<Vec<Example>, AppError> {
    let rows = session
        .query_all(Statement::from_string(DatabaseBackend::Postgres, SAMPLE_ROW_SQL))
        .await?;
    rows.iter()
        .map(|row| -> Result<Example, AppError> {
            let id: i32 = row.try_get("", "id").map_err(DbInfraError::from)?;
            let name: String = row.try_get("", "name").map_err(DbInfraError::from)?;
            Ok(Example::new(id, name))
        })
        .collect()
}

async fn list_async_examples(db: AsyncDb) -> Result<HttpResponse, AppError> {
    let rows = db.run(|session| select_sample_async(session).boxed()).await?;
    Ok(HttpResponse::Ok().json(with_static_examples(rows, "Async example")))
}

async fn insert_async(session: &mut AsyncSession, name: String) -> Result<Example, AppError> {
    let stmt = Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        INSERT_SQL,
        vec![name.clone().into()],
    );
    let inserted = async {
        let row = returned_row(session.query_one(stmt).await?)?;
        let id: i32 = row.try_get("", "id")?;
        session.commit().await?;
        Ok::<_, DbInfraError>(id)
    }
    .await;

    match inserted {
        Ok(id) => Ok(Example::new(id, name)),
        Err(e) => {
            if let Err(rollback) = session.rollback().await {
                debug!(error = %rollback, "rollback after failed insert also failed");
            }
            Err(e.into())
        }
    }
}

async fn create_async_example(
    db: AsyncDb,
    body: Option<web::Json<NewExample>>,
) -> Result<HttpResponse, AppError> {
    let name = body.map(web::Json::into_inner).unwrap_or_default().name_or_default();
    let example = db
        .run(move |session| insert_async(session, name).boxed())
        .await?;
    Ok(HttpResponse::Ok().json(example))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(db_status))
        .route("/examples", web::get().to(list_examples))
        .route("/examples", web::post().to(create_example))
        .route("/async-examples", web::get().to(list_async_examples))
        .route("/async-examples", web::post().to(create_async_example));
}
