use tracing::info;

use crate::limits::MAX_NAME_LEN;
use crate::model::*;
use crate::time::parse_timezone;

use super::shifts::validate_shifts;
use super::validate::{require_id, require_text};
use super::{Engine, EngineError, Entity};

impl Engine {
    pub async fn create_restaurant(&self, restaurant: Restaurant) -> Result<(), EngineError> {
        require_id("restaurant id", &restaurant.id)?;
        require_text("restaurant name", &restaurant.name, MAX_NAME_LEN)?;
        parse_timezone(&restaurant.timezone)?;
        validate_shifts(&restaurant.shifts)?;
        let id = restaurant.id.clone();
        self.store.create_restaurant(restaurant).await?;
        info!("created restaurant {id}");
        Ok(())
    }

    pub async fn create_sector(&self, sector: Sector) -> Result<(), EngineError> {
        require_id("sector id", &sector.id)?;
        require_id("restaurant id", &sector.restaurant_id)?;
        require_text("sector name", &sector.name, MAX_NAME_LEN)?;
        let id = sector.id.clone();
        self.store.create_sector(sector).await?;
        info!("created sector {id}");
        Ok(())
    }

    pub async fn create_table(&self, table: Table) -> Result<(), EngineError> {
        require_id("table id", &table.id)?;
        require_id("sector id", &table.sector_id)?;
        require_text("table name", &table.name, MAX_NAME_LEN)?;
        if table.min_size == 0 || table.min_size > table.max_size {
            return Err(EngineError::invalid(format!(
                "table capacity {}..{} must satisfy 1 <= min <= max",
                table.min_size, table.max_size
            )));
        }
        let id = table.id.clone();
        self.store.create_table(table).await?;
        info!("created table {id}");
        Ok(())
    }

    pub async fn restaurants(&self) -> Result<Vec<Restaurant>, EngineError> {
        self.store.restaurants().await
    }

    /// Sectors of a restaurant with the largest table capacity in each.
    pub async fn sectors(&self, restaurant_id: &str) -> Result<Vec<SectorInfo>, EngineError> {
        if self.store.restaurant(restaurant_id).await?.is_none() {
            return Err(EngineError::not_found(Entity::Restaurant, restaurant_id));
        }
        let mut out = Vec::new();
        for sector in self.store.sectors_by_restaurant(restaurant_id).await? {
            let max_capacity = self
                .store
                .tables_by_sector(&sector.id)
                .await?
                .iter()
                .map(|t| t.max_size)
                .max()
                .unwrap_or(0);
            out.push(SectorInfo {
                id: sector.id,
                restaurant_id: sector.restaurant_id,
                name: sector.name,
                max_capacity,
            });
        }
        Ok(out)
    }
}
