use actix_web::{web, HttpResponse};
use sea_orm::sea_query::Query;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::entity::{institucion, titulo, titulo_user, user};
use crate::error::AppError;
use crate::pagination::{to_collection_dict, PageQuery};
use crate::routes::users::user_page;
use crate::routes::{created, db_error, map_commit_error};
use crate::session::{CommitHooks, Session};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(
        web::resource("/{id:\\d+}")
            .route(web::get().to(get))
            .route(web::put().to(update)),
    )
    .service(
        web::resource("/{id:\\d+}/users")
            .route(web::get().to(list_users))
            .route(web::post().to(attach_user))
            .route(web::delete().to(detach_user)),
    );
}

#[derive(Deserialize)]
struct TituloRequest {
    titulo: Option<String>,
    orientacion: Option<String>,
    carrera: Option<String>,
    resolucion: Option<String>,
    modalidad: Option<String>,
    institucion_id: Option<i32>,
}

#[derive(Serialize)]
pub struct TituloDto {
    id: i32,
    titulo: String,
    orientacion: Option<String>,
    carrera: Option<String>,
    resolucion: Option<String>,
    modalidad: String,
    institucion_id: Option<i32>,
}

pub fn to_titulo_dto(model: titulo::Model) -> TituloDto {
    TituloDto {
        id: model.id,
        titulo: model.titulo,
        orientacion: model.orientacion,
        carrera: model.carrera,
        resolucion: model.resolucion,
        modalidad: model.modalidad,
        institucion_id: model.institucion_id,
    }
}

fn from_request(active: &mut titulo::ActiveModel, data: TituloRequest) {
    if let Some(v) = data.titulo {
        active.titulo = Set(v);
    }
    if let Some(v) = data.orientacion {
        active.orientacion = Set(Some(v));
    }
    if let Some(v) = data.carrera {
        active.carrera = Set(Some(v));
    }
    if let Some(v) = data.resolucion {
        active.resolucion = Set(Some(v));
    }
    if let Some(v) = data.modalidad {
        active.modalidad = Set(v);
    }
    if let Some(v) = data.institucion_id {
        active.institucion_id = Set(Some(v));
    }
}

async fn get(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    Ok(HttpResponse::Ok().json(to_titulo_dto(model)))
}

async fn list(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let select = titulo::Entity::find().order_by_asc(titulo::Column::Id);
    let page = to_collection_dict(db.get_ref(), select, query.page(), query.per_page(), "/api/titulos", &[])
        .await
        .map_err(db_error("list titulos"))?;
    Ok(HttpResponse::Ok().json(page.map(to_titulo_dto)))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    hooks: web::Data<CommitHooks>,
    payload: web::Json<TituloRequest>,
) -> Result<HttpResponse, AppError> {
    let data = payload.into_inner();
    let (Some(nombre), Some(orientacion), Some(_), Some(_), Some(_)) = (
        data.titulo.clone(),
        data.orientacion.clone(),
        data.carrera.as_ref(),
        data.resolucion.as_ref(),
        data.modalidad.as_ref(),
    ) else {
        return Err(AppError::bad_request(
            "must include titulo, orientacion, carrera, resolucion and modalidad fields",
        ));
    };
    if exists(db.get_ref(), titulo::Column::Titulo, &nombre).await? {
        return Err(AppError::bad_request("please use a different titulo"));
    }
    if exists(db.get_ref(), titulo::Column::Orientacion, &orientacion).await? {
        return Err(AppError::bad_request("please use a different orientacion"));
    }
    if let Some(institucion_id) = data.institucion_id {
        check_institucion(db.get_ref(), institucion_id).await?;
    }

    let session = Session::begin(db.get_ref()).await.map_err(db_error("begin"))?;
    let mut active = <titulo::ActiveModel as Default>::default();
    from_request(&mut active, data);
    let model = active.insert(&*session).await.map_err(db_error("insert titulo"))?;
    session.commit(&hooks).await.map_err(map_commit_error)?;

    Ok(created(format!("/api/titulos/{}", model.id), &to_titulo_dto(model)))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    hooks: web::Data<CommitHooks>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<TituloRequest>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    if auth.user_id != id {
        return Err(AppError::forbidden());
    }
    let current = find(db.get_ref(), id).await?;
    let data = payload.into_inner();
    if let Some(nombre) = &data.titulo {
        if *nombre != current.titulo && exists(db.get_ref(), titulo::Column::Titulo, nombre).await? {
            return Err(AppError::bad_request("please use a different titulo"));
        }
    }
    if let Some(orientacion) = &data.orientacion {
        if current.orientacion.as_ref() != Some(orientacion)
            && exists(db.get_ref(), titulo::Column::Orientacion, orientacion).await?
        {
            return Err(AppError::bad_request("please use a different orientacion"));
        }
    }
    if let Some(institucion_id) = data.institucion_id {
        check_institucion(db.get_ref(), institucion_id).await?;
    }

    let session = Session::begin(db.get_ref()).await.map_err(db_error("begin"))?;
    let mut active: titulo::ActiveModel = current.into();
    from_request(&mut active, data);
    let model = active.update(&*session).await.map_err(db_error("update titulo"))?;
    session.commit(&hooks).await.map_err(map_commit_error)?;

    Ok(HttpResponse::Ok().json(to_titulo_dto(model)))
}

async fn list_users(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    let select = user::Entity::find()
        .filter(
            user::Column::Id.in_subquery(
                Query::select()
                    .column(titulo_user::Column::UserId)
                    .from(titulo_user::Entity)
                    .and_where(titulo_user::Column::TituloId.eq(model.id))
                    .to_owned(),
            ),
        )
        .order_by_asc(user::Column::Id);
    let endpoint = format!("/api/titulos/{}/users", model.id);
    let page = to_collection_dict(db.get_ref(), select, query.page(), query.per_page(), &endpoint, &[])
        .await
        .map_err(db_error("list users of titulo"))?;
    Ok(HttpResponse::Ok().json(user_page(db.get_ref(), page, auth.user_id).await?))
}

/// Links the caller to the title. Linking twice is a no-op.
async fn attach_user(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    let existing = titulo_user::Entity::find_by_id((model.id, auth.user_id))
        .one(db.get_ref())
        .await
        .map_err(db_error("find titulo_user"))?;
    if existing.is_none() {
        titulo_user::ActiveModel {
            titulo_id: Set(model.id),
            user_id: Set(auth.user_id),
        }
        .insert(db.get_ref())
        .await
        .map_err(db_error("insert titulo_user"))?;
    }
    Ok(HttpResponse::Ok().json(to_titulo_dto(model)))
}

async fn detach_user(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    titulo_user::Entity::delete_by_id((model.id, auth.user_id))
        .exec(db.get_ref())
        .await
        .map_err(db_error("delete titulo_user"))?;
    Ok(HttpResponse::NoContent().finish())
}

async fn find<C: ConnectionTrait>(db: &C, id: i32) -> Result<titulo::Model, AppError> {
    titulo::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(db_error("find titulo"))?
        .ok_or_else(AppError::not_found)
}

async fn exists<C: ConnectionTrait>(db: &C, column: titulo::Column, value: &str) -> Result<bool, AppError> {
    let found = titulo::Entity::find()
        .filter(column.eq(value))
        .one(db)
        .await
        .map_err(db_error("titulo uniqueness"))?;
    Ok(found.is_some())
}

async fn check_institucion<C: ConnectionTrait>(db: &C, id: i32) -> Result<(), AppError> {
    institucion::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(db_error("find institucion"))?
        .map(|_| ())
        .ok_or_else(|| AppError::bad_request("institucion_id does not exist"))
}
