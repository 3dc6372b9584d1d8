use actix_web::{web, HttpResponse};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::entity::{institucion, titulo};
use crate::error::AppError;
use crate::pagination::{to_collection_dict, PageQuery};
use crate::routes::titulos::{to_titulo_dto, TituloDto};
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
    .service(web::resource("/{id:\\d+}/titulos").route(web::get().to(list_titulos)));
}

#[derive(Deserialize)]
struct InstitucionRequest {
    #[serde(alias = "nombre")]
    institucion: Option<String>,
    orientacion: Option<String>,
    carrera: Option<String>,
    resolucion: Option<String>,
    modalidad: Option<String>,
    cueanexo: Option<i32>,
    domicilio: Option<String>,
    localidad: Option<String>,
    departamento: Option<String>,
    region: Option<String>,
    ambito: Option<String>,
}

#[derive(Serialize)]
pub struct InstitucionDto {
    id: i32,
    nombre: String,
    orientacion: Option<String>,
    carrera: Option<String>,
    resolucion: Option<String>,
    modalidad: Option<String>,
    cueanexo: Option<i32>,
    domicilio: Option<String>,
    localidad: Option<String>,
    departamento: Option<String>,
    region: Option<String>,
    ambito: Option<String>,
}

fn to_dto(model: institucion::Model) -> InstitucionDto {
    InstitucionDto {
        id: model.id,
        nombre: model.nombre,
        orientacion: model.orientacion,
        carrera: model.carrera,
        resolucion: model.resolucion,
        modalidad: model.modalidad,
        cueanexo: model.cueanexo,
        domicilio: model.domicilio,
        localidad: model.localidad,
        departamento: model.departamento,
        region: model.region,
        ambito: model.ambito,
    }
}

/// Copies every field present in the request onto the record.
fn from_request(active: &mut institucion::ActiveModel, data: InstitucionRequest) {
    if let Some(v) = data.institucion {
        active.nombre = Set(v);
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
        active.modalidad = Set(Some(v));
    }
    if let Some(v) = data.cueanexo {
        active.cueanexo = Set(Some(v));
    }
    if let Some(v) = data.domicilio {
        active.domicilio = Set(Some(v));
    }
    if let Some(v) = data.localidad {
        active.localidad = Set(Some(v));
    }
    if let Some(v) = data.departamento {
        active.departamento = Set(Some(v));
    }
    if let Some(v) = data.region {
        active.region = Set(Some(v));
    }
    if let Some(v) = data.ambito {
        active.ambito = Set(Some(v));
    }
}

async fn get(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    Ok(HttpResponse::Ok().json(to_dto(model)))
}

async fn list(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let select = institucion::Entity::find()
        .order_by_asc(institucion::Column::Nombre)
        .order_by_asc(institucion::Column::Id);
    let page = to_collection_dict(db.get_ref(), select, query.page(), query.per_page(), "/api/instituciones", &[])
        .await
        .map_err(db_error("list instituciones"))?;
    Ok(HttpResponse::Ok().json(page.map(to_dto)))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    hooks: web::Data<CommitHooks>,
    payload: web::Json<InstitucionRequest>,
) -> Result<HttpResponse, AppError> {
    let data = payload.into_inner();
    let (Some(nombre), Some(orientacion), Some(_), Some(_), Some(_)) = (
        data.institucion.clone(),
        data.orientacion.clone(),
        data.carrera.as_ref(),
        data.resolucion.as_ref(),
        data.modalidad.as_ref(),
    ) else {
        return Err(AppError::bad_request(
            "must include institucion, orientacion, carrera, resolucion and modalidad fields",
        ));
    };
    if exists(db.get_ref(), institucion::Column::Nombre, &nombre).await? {
        return Err(AppError::bad_request("please use a different institucion"));
    }
    if exists(db.get_ref(), institucion::Column::Orientacion, &orientacion).await? {
        return Err(AppError::bad_request("please use a different orientacion"));
    }

    let session = Session::begin(db.get_ref()).await.map_err(db_error("begin"))?;
    let mut active = <institucion::ActiveModel as Default>::default();
    from_request(&mut active, data);
    let model = active.insert(&*session).await.map_err(db_error("insert institucion"))?;
    session.commit(&hooks).await.map_err(map_commit_error)?;

    Ok(created(format!("/api/instituciones/{}", model.id), &to_dto(model)))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    hooks: web::Data<CommitHooks>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<InstitucionRequest>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    if auth.user_id != id {
        return Err(AppError::forbidden());
    }
    let current = find(db.get_ref(), id).await?;
    let data = payload.into_inner();
    if let Some(nombre) = &data.institucion {
        if *nombre != current.nombre && exists(db.get_ref(), institucion::Column::Nombre, nombre).await? {
            return Err(AppError::bad_request("please use a different institucion"));
        }
    }
    if let Some(orientacion) = &data.orientacion {
        if current.orientacion.as_ref() != Some(orientacion)
            && exists(db.get_ref(), institucion::Column::Orientacion, orientacion).await?
        {
            return Err(AppError::bad_request("please use a different orientacion"));
        }
    }

    let session = Session::begin(db.get_ref()).await.map_err(db_error("begin"))?;
    let mut active: institucion::ActiveModel = current.into();
    from_request(&mut active, data);
    let model = active.update(&*session).await.map_err(db_error("update institucion"))?;
    session.commit(&hooks).await.map_err(map_commit_error)?;

    Ok(HttpResponse::Ok().json(to_dto(model)))
}

async fn list_titulos(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let inst = find(db.get_ref(), *path).await?;
    let select = titulo::Entity::find()
        .filter(titulo::Column::InstitucionId.eq(inst.id))
        .order_by_asc(titulo::Column::Titulo)
        .order_by_asc(titulo::Column::Id);
    let endpoint = format!("/api/instituciones/{}/titulos", inst.id);
    let page = to_collection_dict(db.get_ref(), select, query.page(), query.per_page(), &endpoint, &[])
        .await
        .map_err(db_error("list titulos of institucion"))?;
    Ok(HttpResponse::Ok().json(page.map::<TituloDto>(to_titulo_dto)))
}

async fn find<C: ConnectionTrait>(db: &C, id: i32) -> Result<institucion::Model, AppError> {
    institucion::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(db_error("find institucion"))?
        .ok_or_else(AppError::not_found)
}

async fn exists<C: ConnectionTrait>(db: &C, column: institucion::Column, value: &str) -> Result<bool, AppError> {
    let found = institucion::Entity::find()
        .filter(column.eq(value))
        .one(db)
        .await
        .map_err(db_error("institucion uniqueness"))?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use crate::entity::institucion;
    use crate::test_support::{bearer, TestCtx};
    use actix_web::http::header::LOCATION;
    use actix_web::test::{call_service, read_body_json, TestRequest};
    use sea_orm::{EntityTrait, PaginatorTrait};
    use serde_json::{json, Value};

    fn escuela_a() -> Value {
        json!({
            "institucion": "Escuela A",
            "orientacion": "Tecnica",
            "carrera": "Informatica",
            "resolucion": "123/20",
            "modalidad": "Presencial"
        })
    }

    #[actix_web::test]
    async fn create_then_duplicate_name_is_rejected() {
        let ctx = TestCtx::new().await;
        let app = test_app!(ctx);

        let req = TestRequest::post().uri("/api/instituciones").set_json(escuela_a()).to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let location = resp.headers().get(LOCATION).unwrap().to_str().unwrap().to_string();
        let body: Value = read_body_json(resp).await;
        assert_eq!(location, format!("/api/instituciones/{}", body["id"]));
        assert_eq!(body["nombre"], "Escuela A");
        assert_eq!(body["carrera"], "Informatica");

        let mut again = escuela_a();
        again["orientacion"] = json!("Otra");
        let req = TestRequest::post().uri("/api/instituciones").set_json(again).to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["message"], "please use a different institucion");
        assert_eq!(institucion::Entity::find().count(&ctx.db).await.unwrap(), 1);
    }

    #[actix_web::test]
    async fn duplicate_orientacion_is_rejected() {
        let ctx = TestCtx::new().await;
        let app = test_app!(ctx);
        call_service(&app, TestRequest::post().uri("/api/instituciones").set_json(escuela_a()).to_request()).await;

        let mut other = escuela_a();
        other["institucion"] = json!("Escuela B");
        let resp = call_service(&app, TestRequest::post().uri("/api/instituciones").set_json(other).to_request()).await;
        assert_eq!(resp.status(), 400);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["message"], "please use a different orientacion");
    }

    #[actix_web::test]
    async fn missing_fields_are_rejected() {
        let ctx = TestCtx::new().await;
        let app = test_app!(ctx);

        for field in ["institucion", "orientacion", "carrera", "resolucion", "modalidad"] {
            let mut data = escuela_a();
            data.as_object_mut().unwrap().remove(field);
            let resp = call_service(&app, TestRequest::post().uri("/api/instituciones").set_json(data).to_request()).await;
            assert_eq!(resp.status(), 400, "without {}", field);
        }
        let resp = call_service(&app, TestRequest::post().uri("/api/instituciones").to_request()).await;
        assert_eq!(resp.status(), 400);
        assert_eq!(institucion::Entity::find().count(&ctx.db).await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn get_requires_token_and_404s_on_unknown_id() {
        let ctx = TestCtx::new().await;
        let (_, token) = ctx.user("lector").await;
        let app = test_app!(ctx);

        let resp = call_service(&app, TestRequest::get().uri("/api/instituciones/1").to_request()).await;
        assert_eq!(resp.status(), 401);

        let req = TestRequest::get()
            .uri("/api/instituciones/999")
            .insert_header(bearer(&token))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn list_is_ordered_by_name_and_caps_per_page() {
        let ctx = TestCtx::new().await;
        let (_, token) = ctx.user("lector").await;
        let app = test_app!(ctx);
        for (name, orientacion) in [("Zeta", "a"), ("Alfa", "b"), ("Media", "c")] {
            let mut data = escuela_a();
            data["institucion"] = json!(name);
            data["orientacion"] = json!(orientacion);
            call_service(&app, TestRequest::post().uri("/api/instituciones").set_json(data).to_request()).await;
        }

        let req = TestRequest::get()
            .uri("/api/instituciones?per_page=1000")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body["_meta"]["per_page"], 100);
        assert_eq!(body["_meta"]["total_items"], 3);
        let names: Vec<&str> = body["items"].as_array().unwrap().iter().map(|i| i["nombre"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Alfa", "Media", "Zeta"]);

        let req = TestRequest::get()
            .uri("/api/instituciones?page=2&per_page=1")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body["items"][0]["nombre"], "Media");
        assert_eq!(body["_links"]["next"], "/api/instituciones?page=3&per_page=1");
        assert_eq!(body["_links"]["prev"], "/api/instituciones?page=1&per_page=1");
    }

    #[actix_web::test]
    async fn update_checks_identity_and_uniqueness() {
        let ctx = TestCtx::new().await;
        let (user, token) = ctx.user("directora").await;
        let app = test_app!(ctx);
        let req = TestRequest::put()
            .uri(&format!("/api/instituciones/{}", user.id))
            .insert_header(bearer(&token))
            .set_json(json!({"localidad": "Rosario"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 404);

        // ids line up: the first institution gets the same id as the first user
        let resp = call_service(&app, TestRequest::post().uri("/api/instituciones").set_json(escuela_a()).to_request()).await;
        let first: Value = read_body_json(resp).await;
        assert_eq!(first["id"], user.id);
        let mut second = escuela_a();
        second["institucion"] = json!("Escuela B");
        second["orientacion"] = json!("Humanista");
        call_service(&app, TestRequest::post().uri("/api/instituciones").set_json(second).to_request()).await;

        let req = TestRequest::put()
            .uri("/api/instituciones/2")
            .insert_header(bearer(&token))
            .set_json(json!({"localidad": "Rosario"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 403);

        let req = TestRequest::put()
            .uri(&format!("/api/instituciones/{}", user.id))
            .insert_header(bearer(&token))
            .set_json(json!({"institucion": "Escuela B"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 400);

        let req = TestRequest::put()
            .uri(&format!("/api/instituciones/{}", user.id))
            .insert_header(bearer(&token))
            .set_json(json!({"institucion": "Escuela A", "localidad": "Rosario", "cueanexo": 500123}))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["nombre"], "Escuela A");
        assert_eq!(body["localidad"], "Rosario");
        assert_eq!(body["cueanexo"], 500123);
        assert_eq!(body["orientacion"], "Tecnica");

        let req = TestRequest::put()
            .uri(&format!("/api/instituciones/{}", user.id))
            .insert_header(bearer(&token))
            .set_json(json!({"cueanexo": "abc"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 400);
        let req = TestRequest::get()
            .uri(&format!("/api/instituciones/{}", user.id))
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body["cueanexo"], 500123);
    }

    #[actix_web::test]
    async fn lists_titles_of_an_institution() {
        let ctx = TestCtx::new().await;
        let (_, token) = ctx.user("lector").await;
        let app = test_app!(ctx);
        let resp = call_service(&app, TestRequest::post().uri("/api/instituciones").set_json(escuela_a()).to_request()).await;
        let inst: Value = read_body_json(resp).await;
        let req = TestRequest::post()
            .uri("/api/titulos")
            .set_json(json!({
                "titulo": "Tecnico en Programacion",
                "orientacion": "Informatica",
                "carrera": "Programacion",
                "resolucion": "1/21",
                "modalidad": "Presencial",
                "institucion_id": inst["id"]
            }))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 201);

        let req = TestRequest::get()
            .uri(&format!("/api/instituciones/{}/titulos", inst["id"]))
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body["_meta"]["total_items"], 1);
        assert_eq!(body["items"][0]["titulo"], "Tecnico en Programacion");

        let req = TestRequest::get()
            .uri("/api/instituciones/77/titulos")
            .insert_header(bearer(&token))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 404);
    }
}
