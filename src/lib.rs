pub mod app;
pub mod connection;
pub mod error;
pub mod factory;
pub mod model;
pub mod query;
pub mod response;
pub mod settings;
pub mod support;
pub mod view;

pub use app::App;
pub use connection::{Connection, ConnectionResolver, DatabaseManager, SqliteConnection};
pub use error::{Error, Result};
pub use factory::{JsonData, ResponseFactory};
pub use model::{Entity, Model, ModelQuery, Paginator};
pub use query::{ALL_COLUMNS, QueryBuilder};
pub use response::{Disposition, HttpResponse, JsonOptions};
pub use support::{Arrayable, Record};
