use actix_web::{web, HttpResponse};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthUser;
use crate::entity::task;
use crate::error::AppError;
use crate::jobs::{get_progress, get_task_in_progress, get_tasks_in_progress, launch_task, settle_task, JobQueue, TaskError};
use crate::routes::db_error;

/// Jobs a user may launch, with the description shown while they run.
const KNOWN_TASKS: &[(&str, &str)] = &[("export_posts", "Exporting posts...")];

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(launch)),
    );
}

#[derive(Deserialize)]
struct LaunchRequest {
    name: Option<String>,
    description: Option<String>,
}

#[derive(Serialize)]
struct TaskDto {
    id: String,
    name: String,
    description: Option<String>,
    complete: bool,
    progress: i64,
}

fn to_dto(model: task::Model, progress: i64) -> TaskDto {
    TaskDto {
        id: model.id,
        name: model.name,
        description: model.description,
        complete: model.complete,
        progress,
    }
}

async fn launch(
    db: web::Data<DatabaseConnection>,
    queue: web::Data<dyn JobQueue>,
    auth: AuthUser,
    payload: web::Json<LaunchRequest>,
) -> Result<HttpResponse, AppError> {
    let data = payload.into_inner();
    let name = data
        .name
        .ok_or_else(|| AppError::bad_request("must include name field"))?;
    let (_, default_description) = KNOWN_TASKS
        .iter()
        .find(|(known, _)| *known == name)
        .ok_or_else(|| AppError::bad_request(format!("unknown task {}", name)))?;
    let running = get_task_in_progress(db.get_ref(), auth.user_id, &name)
        .await
        .map_err(db_error("find task in progress"))?;
    if let Some(mut running) = running {
        settle_task(db.get_ref(), queue.get_ref(), &mut running)
            .await
            .map_err(db_error("settle task"))?;
        if !running.complete {
            return Err(AppError::bad_request(format!("a {} task is currently in progress", name)));
        }
    }

    let description = data.description.unwrap_or_else(|| default_description.to_string());
    let model = launch_task(
        db.get_ref(),
        queue.get_ref(),
        auth.user_id,
        &name,
        Some(description),
        vec![Value::from(auth.user_id)],
    )
    .await
    .map_err(|e| match e {
        TaskError::Queue(e) => AppError::internal("enqueue task", e),
        TaskError::Db(e) => AppError::internal("insert task", e),
    })?;
    let progress = get_progress(queue.get_ref(), &model).await;
    Ok(HttpResponse::Accepted().json(to_dto(model, progress)))
}

async fn list(
    db: web::Data<DatabaseConnection>,
    queue: web::Data<dyn JobQueue>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let rows = get_tasks_in_progress(db.get_ref(), auth.user_id)
        .await
        .map_err(db_error("list tasks"))?;
    let mut items = Vec::with_capacity(rows.len());
    for mut row in rows {
        let progress = settle_task(db.get_ref(), queue.get_ref(), &mut row)
            .await
            .map_err(db_error("settle task"))?;
        if !row.complete {
            items.push(to_dto(row, progress));
        }
    }
    Ok(HttpResponse::Ok().json(items))
}
