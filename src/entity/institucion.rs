use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "t_institucion")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub nombre: String,
    pub orientacion: Option<String>,
    pub carrera: Option<String>,
    pub resolucion: Option<String>,
    pub modalidad: Option<String>,
    pub cueanexo: Option<i32>,
    pub domicilio: Option<String>,
    pub localidad: Option<String>,
    pub departamento: Option<String>,
    pub region: Option<String>,
    pub ambito: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::titulo::Entity")]
    Titulo,
}

impl Related<super::titulo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Titulo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
