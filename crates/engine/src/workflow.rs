// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-kind build workflows.
//!
//! Each request kind maps to a short step list: resolve inputs, mutate the
//! catalog (behind a port lease when the mutation serves it locally), then
//! either push the result directly or delegate the image build to the
//! external pipeline. Steps are idempotent: pulls resolve to the same local
//! ref, mutations are keyed by content hash, and a re-run after a crash
//! repeats the step it was in.

use crate::classify;
use crate::retry::retry;
use crate::runtime::{Runtime, RuntimeError};
use kiln_adapters::{CatalogOperation, CatalogTool, NotifySink, PipelineBackend, RegistryClient};
use kiln_core::{BuildRequest, Clock, PipelineStatus, RequestKind};
use kiln_storage::RequestStore;

pub(crate) async fn execute<S, Cat, Reg, P, N, C>(
    rt: &Runtime<S, Cat, Reg, P, N, C>,
    req: &BuildRequest,
) -> Result<String, RuntimeError>
where
    S: RequestStore,
    Cat: CatalogTool,
    Reg: RegistryClient,
    P: PipelineBackend,
    N: NotifySink,
    C: Clock,
{
    match req.kind {
        RequestKind::Add => serve_and_mutate(rt, req, "add-bundles", &["bundles"], true).await,
        RequestKind::Remove => {
            serve_and_mutate(rt, req, "remove-operators", &["operators"], true).await
        }
        RequestKind::FbcOperation => {
            serve_and_mutate(rt, req, "apply-fragment", &["fragment"], true).await
        }
        RequestKind::CreateEmpty => serve_and_mutate(rt, req, "init-empty", &[], false).await,
        RequestKind::Regenerate => regenerate(rt, req).await,
        RequestKind::Merge => merge(rt, req).await,
    }
}

/// Add/remove/fragment/init flows: the catalog is served locally during the
/// mutation, so a port lease brackets it.
async fn serve_and_mutate<S, Cat, Reg, P, N, C>(
    rt: &Runtime<S, Cat, Reg, P, N, C>,
    req: &BuildRequest,
    verb: &str,
    arg_fields: &[&'static str],
    pull_from_index: bool,
) -> Result<String, RuntimeError>
where
    S: RequestStore,
    Cat: CatalogTool,
    Reg: RegistryClient,
    P: PipelineBackend,
    N: NotifySink,
    C: Clock,
{
    let from_index = payload_str(req, "from_index")?;
    let catalog_ref = if pull_from_index {
        rt.progress(req, "resolving the container images")?;
        retry(&rt.config.io_retry, classify::registry_class, || rt.registry.pull(from_index))
            .await
            .map_err(RuntimeError::Registry)?
    } else {
        from_index.to_string()
    };

    let operation = CatalogOperation::new(verb, mutation_args(req, arg_fields)?);
    let content_hash = mutate_with_lease(rt, req, &catalog_ref, &operation).await?;
    finish(rt, req, content_hash).await
}

/// Regenerate operates on a bundle, not a served catalog — no port lease.
async fn regenerate<S, Cat, Reg, P, N, C>(
    rt: &Runtime<S, Cat, Reg, P, N, C>,
    req: &BuildRequest,
) -> Result<String, RuntimeError>
where
    S: RequestStore,
    Cat: CatalogTool,
    Reg: RegistryClient,
    P: PipelineBackend,
    N: NotifySink,
    C: Clock,
{
    let bundle = payload_str(req, "bundle")?;
    rt.progress(req, "resolving the bundle image")?;
    let local_ref =
        retry(&rt.config.io_retry, classify::registry_class, || rt.registry.pull(bundle))
            .await
            .map_err(RuntimeError::Registry)?;

    rt.progress(req, "regenerating the bundle")?;
    let mut args = serde_json::Map::new();
    if let Some(org) = req.payload.get("organization") {
        args.insert("organization".to_string(), org.clone());
    }
    let operation = CatalogOperation::new("regenerate-bundle", serde_json::Value::Object(args));
    let content_hash = retry(&rt.config.io_retry, classify::catalog_class, || {
        rt.catalog.mutate(&local_ref, &operation)
    })
    .await
    .map_err(RuntimeError::Catalog)?;

    finish(rt, req, content_hash).await
}

/// Merge pulls both indexes, then serves the target catalog for the merge.
async fn merge<S, Cat, Reg, P, N, C>(
    rt: &Runtime<S, Cat, Reg, P, N, C>,
    req: &BuildRequest,
) -> Result<String, RuntimeError>
where
    S: RequestStore,
    Cat: CatalogTool,
    Reg: RegistryClient,
    P: PipelineBackend,
    N: NotifySink,
    C: Clock,
{
    let source = payload_str(req, "source_from_index")?;
    let target = payload_str(req, "target_index")?;

    rt.progress(req, "resolving the container images")?;
    let source_ref =
        retry(&rt.config.io_retry, classify::registry_class, || rt.registry.pull(source))
            .await
            .map_err(RuntimeError::Registry)?;
    let target_ref =
        retry(&rt.config.io_retry, classify::registry_class, || rt.registry.pull(target))
            .await
            .map_err(RuntimeError::Registry)?;

    let operation = CatalogOperation::new(
        "merge-catalogs",
        serde_json::json!({ "source": source_ref }),
    );
    let content_hash = mutate_with_lease(rt, req, &target_ref, &operation).await?;
    finish(rt, req, content_hash).await
}

/// Run one catalog mutation behind a port lease.
///
/// The lease is released on both paths before the mutation result is
/// inspected; release failures are logged, not raised, since the TTL reaper
/// covers them.
async fn mutate_with_lease<S, Cat, Reg, P, N, C>(
    rt: &Runtime<S, Cat, Reg, P, N, C>,
    req: &BuildRequest,
    catalog_ref: &str,
    operation: &CatalogOperation,
) -> Result<String, RuntimeError>
where
    S: RequestStore,
    Cat: CatalogTool,
    Reg: RegistryClient,
    P: PipelineBackend,
    N: NotifySink,
    C: Clock,
{
    let lease = rt
        .ports
        .acquire_with_backoff(&rt.config.lease_acquire)
        .await
        .map_err(RuntimeError::Lease)?;
    rt.progress(req, "running the catalog mutation")?;
    let result = retry(&rt.config.io_retry, classify::catalog_class, || {
        rt.catalog.mutate(catalog_ref, operation)
    })
    .await;
    if let Err(err) = rt.ports.release(&lease) {
        tracing::warn!(port = lease.resource_id, error = %err,
            "failed to release port lease, leaving it to the reaper");
    }
    result.map_err(RuntimeError::Catalog)
}

/// Produce the request's artifact reference from the mutated catalog:
/// either push the image directly or delegate the build to the pipeline.
async fn finish<S, Cat, Reg, P, N, C>(
    rt: &Runtime<S, Cat, Reg, P, N, C>,
    req: &BuildRequest,
    content_hash: String,
) -> Result<String, RuntimeError>
where
    S: RequestStore,
    Cat: CatalogTool,
    Reg: RegistryClient,
    P: PipelineBackend,
    N: NotifySink,
    C: Clock,
{
    if !is_delegated(req) {
        let destination = push_destination(req)?;
        rt.progress(req, "pushing the index image")?;
        // The content hash doubles as the local image reference.
        let digest = retry(&rt.config.io_retry, classify::registry_class, || {
            rt.registry.push(&content_hash, &destination)
        })
        .await
        .map_err(RuntimeError::Registry)?;
        return Ok(format!("{destination}@{digest}"));
    }

    let repo = payload_str(req, "index_repo")?;
    rt.progress(req, "pushing the change for the delegated build")?;
    let change = serde_json::json!({
        "request_id": req.id,
        "kind": req.kind.to_string(),
        "content_hash": content_hash,
    });
    let mut run = rt.reconciler.submit_change(repo, &change).await?;
    rt.progress(req, &format!("waiting for pipeline run {}", run.external_id))?;

    if let Err(err) = rt.reconciler.await_completion(&mut run).await {
        rt.reconciler.rollback(&run).await;
        return Err(err.into());
    }

    match run.status {
        PipelineStatus::Succeeded => run
            .result_artifact
            .clone()
            .ok_or(RuntimeError::ArtifactMissing { external_id: run.external_id.clone() }),
        PipelineStatus::TimedOut => {
            rt.reconciler.rollback(&run).await;
            Err(RuntimeError::PipelineTimeout)
        }
        _ => {
            rt.reconciler.rollback(&run).await;
            Err(RuntimeError::PipelineFailed {
                reason: run
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "remote run reported failure".to_string()),
            })
        }
    }
}

fn is_delegated(req: &BuildRequest) -> bool {
    req.payload.get("delegated").and_then(serde_json::Value::as_bool).unwrap_or(false)
}

fn payload_str<'a>(req: &'a BuildRequest, field: &'static str) -> Result<&'a str, RuntimeError> {
    req.payload
        .get(field)
        .and_then(serde_json::Value::as_str)
        .ok_or(RuntimeError::MissingField(field))
}

/// Collect the named payload fields into the mutation's argument object.
fn mutation_args(
    req: &BuildRequest,
    fields: &[&'static str],
) -> Result<serde_json::Value, RuntimeError> {
    let mut args = serde_json::Map::new();
    for &field in fields {
        let value = req.payload.get(field).ok_or(RuntimeError::MissingField(field))?;
        args.insert(field.to_string(), value.clone());
    }
    Ok(serde_json::Value::Object(args))
}

/// Where the built index is pushed: an explicit `output` wins, otherwise
/// the source image's repository tagged for this request.
fn push_destination(req: &BuildRequest) -> Result<String, RuntimeError> {
    if let Some(output) = req.payload.get("output").and_then(serde_json::Value::as_str) {
        return Ok(output.to_string());
    }
    let source = match req.kind {
        RequestKind::Merge => payload_str(req, "target_index")?,
        RequestKind::Regenerate => payload_str(req, "bundle")?,
        _ => payload_str(req, "from_index")?,
    };
    let repo = source.rsplit_once(':').map_or(source, |(repo, _)| repo);
    Ok(format!("{repo}:kiln-build-{}", req.id))
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
