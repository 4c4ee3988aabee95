//! Built-in pipeline steps
//!
//! Registered by [`StepRegistry::with_defaults`]. Each step reads what it
//! needs from the context and contributes its result under a well-known key.

use crate::models::{SocialIdentity, UserDetails, UserRecord};
use crate::pipeline::{PipelineContext, StepError, StepOutcome, StepRegistry};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Default authentication pipeline
pub const DEFAULT_AUTH_PIPELINE: &[&str] = &[
    "social.details",
    "social.uid",
    "social.auth_allowed",
    "social.user",
    "social.create_user",
    "social.associate_user",
    "social.load_extra_data",
];

/// Default disconnect pipeline
pub const DEFAULT_DISCONNECT_PIPELINE: &[&str] = &[
    "social.disconnect.allowed",
    "social.disconnect.get_entries",
    "social.disconnect.disconnect",
];

type StepFn = fn(&[Value], &PipelineContext<'_>) -> Result<StepOutcome, StepError>;

const DEFAULT_STEPS: &[(&str, StepFn)] = &[
    ("social.details", social_details),
    ("social.uid", social_uid),
    ("social.auth_allowed", auth_allowed),
    ("social.user", social_user),
    ("social.create_user", create_user),
    ("social.associate_user", associate_user),
    ("social.load_extra_data", load_extra_data),
    ("social.disconnect.allowed", allowed_to_disconnect),
    ("social.disconnect.get_entries", get_entries),
    ("social.disconnect.disconnect", disconnect),
];

pub(crate) fn register_defaults(registry: &mut StepRegistry) {
    for (address, step) in DEFAULT_STEPS {
        let registered = registry.register_step(address, Arc::new(*step)).is_ok();
        debug_assert!(registered, "malformed built-in step address {address}");
    }
}

fn backend_name<'c>(ctx: &'c PipelineContext<'_>) -> &'c str {
    ctx.get_str("name").unwrap_or_else(|| ctx.backend().name())
}

fn details_of(ctx: &PipelineContext<'_>) -> Result<UserDetails, StepError> {
    Ok(ctx.get_as::<UserDetails>("details")?.unwrap_or_default())
}

fn association_id(ctx: &PipelineContext<'_>) -> Result<Option<Uuid>, StepError> {
    ctx.get_as::<Uuid>("association_id")
}

/// Normalize the provider response into `details`
///
/// Details supplied by the caller win over the ones read from the response.
pub fn social_details(
    _args: &[Value],
    ctx: &PipelineContext<'_>,
) -> Result<StepOutcome, StepError> {
    let response = ctx.require("response")?;
    let details = ctx.backend().provider().get_user_details(response)?;

    let mut merged = match serde_json::to_value(details) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(source) => {
            return Err(StepError::InvalidValue {
                key: "details".to_string(),
                source,
            })
        }
    };
    if let Some(Value::Object(supplied)) = ctx.get("details") {
        merged.extend(supplied.clone());
    }
    Ok(StepOutcome::set("details", merged))
}

/// Extract the provider-stable user id into `uid`
pub fn social_uid(_args: &[Value], ctx: &PipelineContext<'_>) -> Result<StepOutcome, StepError> {
    let response = ctx.require("response")?;
    let details = details_of(ctx)?;
    let uid = ctx.backend().provider().get_user_id(&details, response);
    Ok(StepOutcome::set("uid", uid.map_or(Value::Null, Value::String)))
}

/// Reject users outside the configured email and domain allow-lists
pub fn auth_allowed(_args: &[Value], ctx: &PipelineContext<'_>) -> Result<StepOutcome, StepError> {
    let response = ctx.get("response").cloned().unwrap_or(Value::Null);
    let details = details_of(ctx)?;
    if ctx.backend().auth_allowed(&response, &details) {
        Ok(StepOutcome::empty())
    } else {
        Err(StepError::Forbidden(ctx.backend().name().to_string()))
    }
}

/// Look up an existing association for `uid`
pub fn social_user(_args: &[Value], ctx: &PipelineContext<'_>) -> Result<StepOutcome, StepError> {
    let provider = ctx.backend().name();
    let uid: String = ctx.require_as("uid")?;
    let storage = ctx.user_storage();
    let mut user: Option<UserRecord> = ctx.get_as("user")?;

    let social = storage.get_social_auth(provider, &uid)?;
    if let Some(social) = &social {
        match &user {
            Some(current) if current.id != social.user_id => {
                return Err(StepError::AlreadyAssociated(provider.to_string()));
            }
            Some(_) => {}
            None => user = storage.get_user(&social.user_id)?,
        }
    }

    StepOutcome::empty()
        .with("is_new", user.is_none())
        .with("new_association", false)
        .with_serialized("social", &social)?
        .with_serialized("user", &user)
}

/// Create the application user when none was found
pub fn create_user(_args: &[Value], ctx: &PipelineContext<'_>) -> Result<StepOutcome, StepError> {
    if ctx.get("user").is_some() {
        return Ok(StepOutcome::set("is_new", false));
    }
    let Some(details) = ctx.get_as::<UserDetails>("details")? else {
        return Ok(StepOutcome::empty());
    };

    let storage = ctx.user_storage();
    let base = details
        .username
        .clone()
        .or_else(|| {
            details
                .email
                .as_deref()
                .and_then(|email| email.split_once('@'))
                .map(|(local, _)| local.to_string())
        })
        .or_else(|| ctx.get_str("uid").map(ToString::to_string))
        .ok_or_else(|| StepError::MissingValue("username".to_string()))?;

    let mut username = base.clone();
    let mut suffix = 1;
    while storage.user_exists(&username)? {
        username = format!("{base}{suffix}");
        suffix += 1;
    }

    let user = storage.create_user(&username, details.email.as_deref())?;
    StepOutcome::set("is_new", true).with_serialized("user", &user)
}

/// Link the user to the provider identity if not linked yet
pub fn associate_user(
    _args: &[Value],
    ctx: &PipelineContext<'_>,
) -> Result<StepOutcome, StepError> {
    let Some(user) = ctx.get_as::<UserRecord>("user")? else {
        return Ok(StepOutcome::empty());
    };
    if ctx.get("social").is_some() {
        return Ok(StepOutcome::empty());
    }

    let uid: String = ctx.require_as("uid")?;
    let social = ctx
        .user_storage()
        .create_social_auth(&user, &uid, ctx.backend().name())?;
    StepOutcome::set("new_association", true).with_serialized("social", &social)
}

/// Store provider extra data on the association
pub fn load_extra_data(
    _args: &[Value],
    ctx: &PipelineContext<'_>,
) -> Result<StepOutcome, StepError> {
    let Some(social) = ctx.get_as::<SocialIdentity>("social")? else {
        return Ok(StepOutcome::empty());
    };
    let user = ctx.get("user").cloned().unwrap_or(Value::Null);
    let response = ctx.get("response").cloned().unwrap_or(Value::Null);
    let details = details_of(ctx)?;

    let extra = ctx
        .backend()
        .extra_data(&user, &social.uid, &response, &details);
    if extra.is_empty() {
        return Ok(StepOutcome::empty());
    }
    let social = ctx.user_storage().set_extra_data(social.id, extra)?;
    StepOutcome::empty().with_serialized("social", &social)
}

/// Refuse to remove the last way the user can log in
pub fn allowed_to_disconnect(
    _args: &[Value],
    ctx: &PipelineContext<'_>,
) -> Result<StepOutcome, StepError> {
    let user: UserRecord = ctx.require_as("user")?;
    let name = backend_name(ctx);
    if ctx
        .user_storage()
        .allowed_to_disconnect(&user, name, association_id(ctx)?)?
    {
        Ok(StepOutcome::empty())
    } else {
        Err(StepError::NotAllowedToDisconnect(name.to_string()))
    }
}

/// Collect the associations to remove into `entries`
pub fn get_entries(_args: &[Value], ctx: &PipelineContext<'_>) -> Result<StepOutcome, StepError> {
    let user: UserRecord = ctx.require_as("user")?;
    let entries = ctx.user_storage().get_social_auth_for_user(
        &user,
        Some(backend_name(ctx)),
        association_id(ctx)?,
    )?;
    StepOutcome::empty().with_serialized("entries", &entries)
}

/// Remove every association listed in `entries`
pub fn disconnect(_args: &[Value], ctx: &PipelineContext<'_>) -> Result<StepOutcome, StepError> {
    let entries: Vec<SocialIdentity> = ctx.get_as("entries")?.unwrap_or_default();
    let storage = ctx.user_storage();
    for entry in &entries {
        storage.disconnect(entry)?;
    }
    Ok(StepOutcome::set("disconnected", entries.len()))
}
