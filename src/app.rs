use crate::connection::DatabaseManager;
use crate::error::Result;
use crate::factory::ResponseFactory;
use crate::model::{Entity, Model};
use crate::settings::Settings;
use log::info;
use std::sync::Arc;

/// Application context handed to request handlers.
///
/// Built once by [`App::boot`]; register response macros on `responses`
/// before sharing the context.
#[derive(Clone)]
pub struct App {
    pub db: Arc<DatabaseManager>,
    pub responses: Arc<ResponseFactory>,
    pub settings: Settings,
}

impl App {
    pub async fn boot(settings: Settings) -> Result<Self> {
        Self::boot_with(settings, |_| {}).await
    }

    /// Boot, letting `configure` register macros before the factory is shared.
    pub async fn boot_with<F>(settings: Settings, configure: F) -> Result<Self>
    where
        F: FnOnce(&mut ResponseFactory),
    {
        settings.validate()?;
        let db = DatabaseManager::from_settings(&settings.database).await?;
        let mut responses = ResponseFactory::from_settings(&settings);
        configure(&mut responses);
        info!(
            "Booted with {} response macros, default connection `{}`",
            responses.macros().len(),
            settings.database.default
        );
        Ok(App {
            db: Arc::new(db),
            responses: Arc::new(responses),
            settings,
        })
    }

    pub fn model<E: Entity>(&self) -> Model<E> {
        self.db.model::<E>()
    }

    pub async fn shutdown(&self) {
        self.db.close().await;
    }
}
