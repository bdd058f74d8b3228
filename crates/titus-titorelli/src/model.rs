use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use titus_core::{
    domain::UserId,
    ports::{Classifier, PredictRequest, Prediction},
    Result,
};

use crate::{endpoint, ensure_success, http_client, request_err};

const SERVICE: &str = "model";

#[derive(Serialize)]
struct ProtectRequest {
    #[serde(rename = "tgUserId")]
    user_id: UserId,
}

#[derive(Clone, Debug)]
pub struct TitorelliModel {
    predict_url: Url,
    totems_url: Url,
    access_token: String,
    http: reqwest::Client,
}

impl TitorelliModel {
    pub fn new(origin: &Url, access_token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            predict_url: endpoint(origin, "predict")?,
            totems_url: endpoint(origin, "totems")?,
            access_token: access_token.into(),
            http: http_client()?,
        })
    }
}

#[async_trait]
impl Classifier for TitorelliModel {
    async fn predict(&self, req: PredictRequest) -> Result<Prediction> {
        let resp = self
            .http
            .post(self.predict_url.clone())
            .bearer_auth(&self.access_token)
            .json(&req)
            .send()
            .await
            .map_err(|e| request_err(SERVICE, e))?;

        ensure_success(SERVICE, resp)
            .await?
            .json::<Prediction>()
            .await
            .map_err(|e| request_err(SERVICE, e))
    }

    async fn protect(&self, user_id: UserId) -> Result<()> {
        let resp = self
            .http
            .post(self.totems_url.clone())
            .bearer_auth(&self.access_token)
            .json(&ProtectRequest { user_id })
            .send()
            .await
            .map_err(|e| request_err(SERVICE, e))?;

        ensure_success(SERVICE, resp).await?;
        debug!(user_id = user_id.0, "totem granted");
        Ok(())
    }
}
