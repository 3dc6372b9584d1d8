pub mod followers;
pub mod institucion;
pub mod message;
pub mod notification;
pub mod post;
pub mod role;
pub mod task;
pub mod titulo;
pub mod titulo_user;
pub mod user;
