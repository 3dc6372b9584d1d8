use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "t_titulo")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub titulo: String,
    pub orientacion: Option<String>,
    pub carrera: Option<String>,
    pub resolucion: Option<String>,
    pub modalidad: String,
    pub institucion_id: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::institucion::Entity",
        from = "Column::InstitucionId",
        to = "super::institucion::Column::Id"
    )]
    Institucion,
}

impl Related<super::institucion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Institucion.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
