use crate::config::BoardConfig;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;

const API_VERSION: &str = "2024-10";

/// A file attached to a board item.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public_url: String,
    #[serde(default)]
    pub file_extension: String,
}

impl Asset {
    pub fn is_pdf(&self) -> bool {
        self.file_extension
            .trim_start_matches('.')
            .eq_ignore_ascii_case("pdf")
            || self.name.to_ascii_lowercase().ends_with(".pdf")
    }
}

/// Downloaded file contents, keyed by the name it is uploaded and attached under.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
}

/// The project-management board operations a run needs.
#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn item_assets(&self, item_id: &str) -> Result<Vec<Asset>>;

    async fn download(&self, asset: &Asset) -> Result<Vec<u8>>;

    async fn create_item(
        &self,
        board_id: &str,
        group_id: Option<&str>,
        name: &str,
        column_values: &Value,
    ) -> Result<String>;

    async fn create_subitem(&self, parent_id: &str, name: &str, column_values: &Value)
    -> Result<String>;

    async fn attach_file(&self, item_id: &str, column_id: &str, file: &Attachment) -> Result<()>;

    async fn set_status(&self, board_id: &str, item_id: &str, column_id: &str, label: &str)
    -> Result<()>;
}

const ADD_FILE_MUTATION: &str = "mutation ($item: ID!, $column: String!, $file: File!) { \
     add_file_to_column (item_id: $item, column_id: $column, file: $file) { id } }";

/// Scalar variables for the file upload, sent as multipart fields next to the file part.
fn file_variables(item_id: &str, column_id: &str) -> [(&'static str, String); 2] {
    [
        ("variables[item]", item_id.to_string()),
        ("variables[column]", column_id.to_string()),
    ]
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl<T> GraphQlResponse<T> {
    fn into_result(self) -> Result<T> {
        if !self.errors.is_empty() {
            let joined = self
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(BridgeError::GraphQl(joined));
        }
        self.data
            .ok_or_else(|| BridgeError::GraphQl("response carried no data".into()))
    }
}

#[derive(Debug, Deserialize)]
struct ItemsData {
    items: Vec<ItemAssets>,
}

#[derive(Debug, Deserialize)]
struct ItemAssets {
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreateItemData {
    create_item: IdOnly,
}

#[derive(Debug, Deserialize)]
struct CreateSubitemData {
    create_subitem: IdOnly,
}

#[derive(Debug, Deserialize)]
struct ChangeValueData {
    #[allow(dead_code)]
    change_simple_column_value: IdOnly,
}

#[derive(Debug, Deserialize)]
struct AddFileData {
    #[allow(dead_code)]
    add_file_to_column: IdOnly,
}

/// GraphQL client for the board API.
pub struct BoardClient {
    client: Client,
    api_url: String,
    file_api_url: String,
    api_token: String,
}

impl BoardClient {
    pub fn new(cfg: &BoardConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            api_url: cfg.api_url.clone(),
            file_api_url: cfg.file_api_url.clone(),
            api_token: cfg.api_token.clone(),
        })
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", &self.api_token)
            .header("API-Version", API_VERSION)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        let body: GraphQlResponse<T> = checked(response).await?.json().await?;
        body.into_result()
    }
}

async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(BridgeError::Api {
            service: "board",
            status,
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl BoardApi for BoardClient {
    async fn item_assets(&self, item_id: &str) -> Result<Vec<Asset>> {
        let data: ItemsData = self
            .graphql(
                "query ($ids: [ID!]) { items (ids: $ids) { assets { id name public_url file_extension } } }",
                json!({ "ids": [item_id] }),
            )
            .await?;
        let assets: Vec<Asset> = data.items.into_iter().flat_map(|i| i.assets).collect();
        info!(item_id = %item_id, assets = assets.len(), "Fetched item assets");
        Ok(assets)
    }

    async fn download(&self, asset: &Asset) -> Result<Vec<u8>> {
        info!(filename = %asset.name, "Downloading asset");
        let response = self.client.get(&asset.public_url).send().await?;
        let bytes = checked(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn create_item(
        &self,
        board_id: &str,
        group_id: Option<&str>,
        name: &str,
        column_values: &Value,
    ) -> Result<String> {
        let data: CreateItemData = self
            .graphql(
                "mutation ($board: ID!, $group: String, $name: String!, $values: JSON) { \
                 create_item (board_id: $board, group_id: $group, item_name: $name, column_values: $values) { id } }",
                json!({
                    "board": board_id,
                    "group": group_id,
                    "name": name,
                    "values": column_values.to_string(),
                }),
            )
            .await?;
        info!(board_id = %board_id, item_id = %data.create_item.id, name = %name, "Item created");
        Ok(data.create_item.id)
    }

    async fn create_subitem(
        &self,
        parent_id: &str,
        name: &str,
        column_values: &Value,
    ) -> Result<String> {
        let data: CreateSubitemData = self
            .graphql(
                "mutation ($parent: ID!, $name: String!, $values: JSON) { \
                 create_subitem (parent_item_id: $parent, item_name: $name, column_values: $values) { id } }",
                json!({
                    "parent": parent_id,
                    "name": name,
                    "values": column_values.to_string(),
                }),
            )
            .await?;
        Ok(data.create_subitem.id)
    }

    async fn attach_file(&self, item_id: &str, column_id: &str, file: &Attachment) -> Result<()> {
        let part = Part::bytes(file.data.clone())
            .file_name(file.name.clone())
            .mime_str("application/pdf")?;
        let form = file_variables(item_id, column_id)
            .into_iter()
            .fold(Form::new().text("query", ADD_FILE_MUTATION), |form, (key, value)| {
                form.text(key, value)
            })
            .part("variables[file]", part);

        let response = self
            .client
            .post(&self.file_api_url)
            .header("Authorization", &self.api_token)
            .header("API-Version", API_VERSION)
            .multipart(form)
            .send()
            .await?;
        let body: GraphQlResponse<AddFileData> = checked(response).await?.json().await?;
        body.into_result()?;
        info!(item_id = %item_id, filename = %file.name, "File attached");
        Ok(())
    }

    async fn set_status(
        &self,
        board_id: &str,
        item_id: &str,
        column_id: &str,
        label: &str,
    ) -> Result<()> {
        let _: ChangeValueData = self
            .graphql(
                "mutation ($board: ID!, $item: ID!, $column: String!, $value: String) { \
                 change_simple_column_value (board_id: $board, item_id: $item, column_id: $column, value: $value) { id } }",
                json!({
                    "board": board_id,
                    "item": item_id,
                    "column": column_id,
                    "value": label,
                }),
            )
            .await?;
        info!(item_id = %item_id, label = %label, "Status updated");
        Ok(())
    }
}
