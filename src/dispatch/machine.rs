use crate::agent::api::{
    BuildStatusResponse, CapacityResponse, StartBuildRequest, StartBuildResponse,
};
use crate::dispatch::remote::RemoteBuildRequest;
use crate::dispatch::{DispatchError, Result};
use crate::manager::project::Project;
use crate::queue::IntegrationRequest;
use crate::types::{BuildId, BuildStatus};
use crate::utils::{APP_USER_AGENT, retry_async};
use reqwest::{
    Method,
    header::{ACCEPT, HeaderValue, USER_AGENT},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use url::Url;

/// The queue manager's handle to one remote build agent. Every call is
/// an independent request/response against the agent's base URL.
///
/// Transport failures and 5xx responses are retried up to `max_retries`
/// times; 4xx responses are surfaced as [`DispatchError::AgentError`]
/// without retrying.
#[derive(Debug)]
pub struct BuildMachine {
    agent_base: Url,
    max_retries: u32,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl BuildMachine {
    pub fn new(agent_base: Url, max_retries: u32, poll_interval: Duration) -> Result<Self> {
        let headers = vec![
            (USER_AGENT, HeaderValue::from_static(APP_USER_AGENT)),
            (ACCEPT, HeaderValue::from_static("application/json")),
        ]
        .into_iter()
        .collect();

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            agent_base,
            max_retries,
            poll_interval,
            client,
        })
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.agent_base.clone();
        url.path_segments_mut()
            .map_err(|()| DispatchError::InvalidAgentUrl)?
            .extend(segments);
        Ok(url)
    }

    async fn request<T>(&self, method: Method, url: &Url, body: Option<&impl Serialize>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let body = body.map(serde_json::to_value).transpose().map_err(|err| {
            DispatchError::Other(anyhow::Error::new(err).context("failed to serialize request"))
        })?;

        let response = retry_async(
            || async {
                let mut request = self.client.request(method.clone(), url.clone());
                if let Some(body) = &body {
                    request = request.json(body);
                }

                let response = request.send().await?;

                if response.status().is_server_error() {
                    let err = response.error_for_status_ref().unwrap_err();
                    let text = response.text().await.unwrap_or_default();
                    Err(DispatchError::HttpError(err, text))
                } else {
                    Ok::<_, DispatchError>(response)
                }
            },
            self.max_retries,
        )
        .await?;

        let status = response.status();

        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(DispatchError::AgentError(status, text))
        }
    }

    /// Ask the agent whether it has capacity for another build. The
    /// answer is advisory: a positive one does not reserve a slot.
    #[instrument(skip(self))]
    pub async fn can_build(&self, project_name: &str) -> Result<bool> {
        let mut url = self.api_url(&["api", "v1", "capacity"])?;
        url.query_pairs_mut().append_pair("project", project_name);

        let response: CapacityResponse = self.request(Method::GET, &url, None::<&()>).await?;
        Ok(response.can_build)
    }

    /// Dispatch a build to the agent and track it with a polling
    /// request that invokes `on_completed` exactly once with the
    /// terminal status.
    #[instrument(skip(self, project, request, on_completed), fields(project = %project.name))]
    pub async fn start_build(
        self: &Arc<Self>,
        project: &Project,
        request: &IntegrationRequest,
        on_completed: impl FnOnce(BuildStatus) + Send + 'static,
    ) -> Result<Arc<RemoteBuildRequest>> {
        let project_definition = toml::to_string(project).map_err(|err| {
            DispatchError::Other(
                anyhow::Error::new(err).context("failed to serialize project definition"),
            )
        })?;

        let body = StartBuildRequest {
            project_definition,
            project_name: project.name.clone(),
            build_condition: request.condition,
            build_values: request.build_values.clone(),
            source: request.source.clone(),
            user_name: request.user_name.clone(),
        };

        let url = self.api_url(&["api", "v1", "builds"])?;
        let response: StartBuildResponse = self.request(Method::POST, &url, Some(&body)).await?;

        Ok(RemoteBuildRequest::start(
            response.build_id,
            self.clone(),
            self.poll_interval,
            on_completed,
        ))
    }

    pub(crate) async fn retrieve_build_status(&self, id: BuildId) -> Result<BuildStatus> {
        let url = self.api_url(&["api", "v1", "builds", &id.to_string()])?;
        let response: BuildStatusResponse = self.request(Method::GET, &url, None::<&()>).await?;
        Ok(response.status)
    }

    pub(crate) async fn cancel_build(&self, id: BuildId) -> Result<()> {
        let url = self.api_url(&["api", "v1", "builds", &id.to_string(), "cancel"])?;
        let _: serde_json::Value = self.request(Method::POST, &url, None::<&()>).await?;
        Ok(())
    }
}
