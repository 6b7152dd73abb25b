//! Generic CRUD access to the yard entities
//!
//! Every entity (clientes, veiculos, patios, boxes, zonas) exposes the same
//! five endpoints, so payloads are carried as JSON values.

use serde_json::{Map, Value};
use tracing::debug;

use super::{check_status, ApiClient, ApiResult, SpringPage};

/// Entity collections exposed by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Resource {
    Clientes,
    Veiculos,
    Patios,
    Boxes,
    Zonas,
}

impl Resource {
    /// Path segment of the collection
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Clientes => "clientes",
            Resource::Veiculos => "veiculos",
            Resource::Patios => "patios",
            Resource::Boxes => "boxes",
            Resource::Zonas => "zonas",
        }
    }

    /// Identifier field, also the default sort key
    pub fn id_field(&self) -> &'static str {
        match self {
            Resource::Clientes => "idCliente",
            Resource::Veiculos => "idVeiculo",
            Resource::Patios => "idPatio",
            Resource::Boxes => "idBox",
            Resource::Zonas => "idZona",
        }
    }

    pub fn default_sort(&self) -> String {
        format!("{},asc", self.id_field())
    }
}

/// Pagination parameters for `search`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    /// `field,direction`; falls back to the resource's id ascending
    pub sort: Option<String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: 10,
            sort: None,
        }
    }
}

/// Drop filter entries that carry no constraint (null, empty or blank strings)
pub fn clean_filter_params(filter: &Map<String, Value>) -> Vec<(String, String)> {
    filter
        .iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::Null => return None,
                Value::String(s) if s.trim().is_empty() => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), rendered))
        })
        .collect()
}

impl ApiClient {
    /// Filtered, paginated listing
    pub async fn search(
        &self,
        resource: Resource,
        filter: &Map<String, Value>,
        page: &PageRequest,
    ) -> ApiResult<SpringPage<Value>> {
        let url = self.endpoint(&[resource.path(), "search"])?;

        let mut params = clean_filter_params(filter);
        params.push(("page".to_string(), page.page.to_string()));
        params.push(("size".to_string(), page.size.to_string()));
        params.push((
            "sort".to_string(),
            page.sort.clone().unwrap_or_else(|| resource.default_sort()),
        ));
        debug!("Searching {} with {:?}", resource.path(), params);

        let response = self.http().get(url).query(&params).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn get(&self, resource: Resource, id: i64) -> ApiResult<Value> {
        let id = id.to_string();
        let url = self.endpoint(&[resource.path(), &id])?;
        let response = self.http().get(url).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn create(&self, resource: Resource, body: &Value) -> ApiResult<Value> {
        let url = self.endpoint(&[resource.path()])?;
        let response = self.http().post(url).json(body).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn update(&self, resource: Resource, id: i64, body: &Value) -> ApiResult<Value> {
        let id = id.to_string();
        let url = self.endpoint(&[resource.path(), &id])?;
        let response = self.http().put(url).json(body).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn delete(&self, resource: Resource, id: i64) -> ApiResult<()> {
        let id = id.to_string();
        let url = self.endpoint(&[resource.path(), &id])?;
        let response = self.http().delete(url).send().await?;
        check_status(response).await?;
        Ok(())
    }
}
