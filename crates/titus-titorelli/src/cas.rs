use async_trait::async_trait;
use reqwest::Url;

use titus_core::{
    domain::UserId,
    ports::{CasClient, CasStatus},
    Result,
};

use crate::{endpoint, ensure_success, http_client, request_err};

const SERVICE: &str = "cas";

#[derive(Clone, Debug)]
pub struct TitorelliCas {
    is_banned_url: Url,
    access_token: String,
    http: reqwest::Client,
}

impl TitorelliCas {
    pub fn new(origin: &Url, access_token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            is_banned_url: endpoint(origin, "cas/isBanned")?,
            access_token: access_token.into(),
            http: http_client()?,
        })
    }

    fn is_banned_url_for(&self, user_id: UserId) -> Url {
        let mut url = self.is_banned_url.clone();
        url.query_pairs_mut()
            .append_pair("tgUserId", &user_id.0.to_string());
        url
    }
}

#[async_trait]
impl CasClient for TitorelliCas {
    async fn is_banned(&self, user_id: UserId) -> Result<CasStatus> {
        let resp = self
            .http
            .get(self.is_banned_url_for(user_id))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| request_err(SERVICE, e))?;

        ensure_success(SERVICE, resp)
            .await?
            .json::<CasStatus>()
            .await
            .map_err(|e| request_err(SERVICE, e))
    }
}
