use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use futures_util::future::join_all;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use huddle_db::{Database, messages::NewMessage};
use huddle_types::api::{AttachmentView, MessageView, PostMessageRequest, ReactionGroup};
use huddle_types::events::GatewayEvent;
use huddle_types::models::{Attachment, Destination, Message, Reaction, User};

use crate::blobs::{BlobStore, is_valid_key};
use crate::error::{ApiError, ApiResult};
use crate::middleware::Session;
use crate::state::AppState;
use crate::unfurl::{MAX_PREVIEWS, extract_urls};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: id of the oldest message on the previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_channel_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<MessageView>>> {
    list_messages(&state, Destination::Channel(channel_id), session.user_id, query).await
}

pub async fn list_conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<MessageView>>> {
    list_messages(&state, Destination::Conversation(conversation_id), session.user_id, query).await
}

pub async fn post_channel_message(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    post_message(&state, Destination::Channel(channel_id), session.user_id, req).await
}

pub async fn post_conversation_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    post_message(&state, Destination::Conversation(conversation_id), session.user_id, req).await
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<MessageView>> {
    let user_id = session.user_id;
    let loaded = state
        .blocking(move |db| {
            let message = db.get_message(message_id)?.ok_or_else(|| not_found(message_id))?;
            db.authorize_destination(message.destination, user_id)?;
            load_details(db, vec![message])
        })
        .await?;

    let mut views = loaded.into_views(state.blobs.as_ref());
    views.pop().map(Json).ok_or(ApiError::NotFound)
}

/// Replies to a message, oldest first.
pub async fn get_thread(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let user_id = session.user_id;
    let loaded = state
        .blocking(move |db| {
            let parent = db.get_message(message_id)?.ok_or_else(|| not_found(message_id))?;
            db.authorize_destination(parent.destination, user_id)?;
            let replies = db.list_thread(message_id)?;
            load_details(db, replies)
        })
        .await?;

    Ok(Json(loaded.into_views(state.blobs.as_ref())))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<StatusCode> {
    let user_id = session.user_id;
    let message = state.blocking(move |db| db.delete_message(message_id, user_id)).await?;

    state.dispatcher.broadcast(GatewayEvent::MessageDelete {
        workspace_id: message.workspace_id,
        destination: message.destination,
        message_id,
    });

    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages(
    state: &AppState,
    destination: Destination,
    user_id: Uuid,
    query: MessageQuery,
) -> ApiResult<Json<Vec<MessageView>>> {
    let loaded = state
        .blocking(move |db| {
            db.authorize_destination(destination, user_id)?;
            let messages = db.list_top_level(destination, query.limit, query.before)?;
            load_details(db, messages)
        })
        .await?;

    Ok(Json(loaded.into_views(state.blobs.as_ref())))
}

async fn post_message(
    state: &AppState,
    destination: Destination,
    author_id: Uuid,
    req: PostMessageRequest,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    if req.text.trim().is_empty() && req.attachments.is_empty() {
        return Err(ApiError::BadRequest("message is empty"));
    }
    if req.attachments.iter().any(|a| !is_valid_key(&a.content_key)) {
        return Err(ApiError::BadRequest("invalid attachment content key"));
    }

    // Authorize before unfurling.
    state
        .blocking(move |db| db.authorize_destination(destination, author_id))
        .await?;

    let link_previews = match req.link_previews {
        Some(previews) => previews,
        None => {
            let urls = extract_urls(&req.text, MAX_PREVIEWS);
            join_all(urls.iter().map(|url| state.unfurler.fetch_preview(url)))
                .await
                .into_iter()
                .flatten()
                .collect()
        }
    };

    let new = NewMessage {
        destination,
        author_id,
        text: req.text,
        reply_to: req.reply_to,
        attachments: req
            .attachments
            .into_iter()
            .map(|a| Attachment {
                content_key: a.content_key,
                name: a.name,
                mime_type: a.mime_type,
            })
            .collect(),
        link_previews,
    };

    let loaded = state
        .blocking(move |db| {
            let message = db.post_message(new, Utc::now())?;
            load_details(db, vec![message])
        })
        .await?;

    let workspace_id = loaded.messages.first().map(|m| m.workspace_id);
    let view = loaded
        .into_views(state.blobs.as_ref())
        .pop()
        .ok_or_else(|| ApiError::Internal("posted message vanished".into()))?;

    if let Some(workspace_id) = workspace_id {
        debug!("Message {} posted to {} {}", view.id, destination.kind(), destination.id());
        state.dispatcher.broadcast(GatewayEvent::MessageCreate {
            workspace_id,
            message: view.clone(),
        });
    }

    Ok((StatusCode::CREATED, Json(view)))
}

fn not_found(message_id: Uuid) -> huddle_db::StoreError {
    huddle_db::StoreError::NotFound {
        entity: "message",
        id: message_id.to_string(),
    }
}

/// Messages plus everything needed to render them.
struct Loaded {
    messages: Vec<Message>,
    reactions: Vec<Reaction>,
    reply_counts: HashMap<Uuid, u64>,
    authors: HashMap<Uuid, User>,
}

fn load_details(db: &Database, messages: Vec<Message>) -> huddle_db::Result<Loaded> {
    let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
    let mut author_ids: Vec<Uuid> = messages.iter().map(|m| m.author_id).collect();
    author_ids.sort();
    author_ids.dedup();

    Ok(Loaded {
        reactions: db.get_reactions_for_messages(&ids)?,
        reply_counts: db.get_reply_counts(&ids)?,
        authors: db.get_users(&author_ids)?,
        messages,
    })
}

impl Loaded {
    fn into_views(self, blobs: &dyn BlobStore) -> Vec<MessageView> {
        build_views(
            self.messages,
            &self.reactions,
            &self.reply_counts,
            &self.authors,
            |key| blobs.resolve_url(key),
        )
    }
}

/// Assemble client-facing messages. Reactions are grouped per emoji in the
/// order each emoji first appeared, and users within a group in the order
/// they reacted.
pub fn build_views(
    messages: Vec<Message>,
    reactions: &[Reaction],
    reply_counts: &HashMap<Uuid, u64>,
    authors: &HashMap<Uuid, User>,
    resolve_url: impl Fn(&str) -> String,
) -> Vec<MessageView> {
    let mut grouped: HashMap<Uuid, Vec<ReactionGroup>> = HashMap::new();
    for r in reactions {
        let groups = grouped.entry(r.message_id).or_default();
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(group) => {
                group.user_ids.push(r.user_id);
                group.count += 1;
            }
            None => groups.push(ReactionGroup {
                emoji: r.emoji.clone(),
                count: 1,
                user_ids: vec![r.user_id],
            }),
        }
    }

    messages
        .into_iter()
        .map(|m| {
            let author = authors.get(&m.author_id);
            MessageView {
                id: m.id,
                destination: m.destination,
                author_id: m.author_id,
                author_name: author.map(|u| u.name.clone()).unwrap_or_else(|| "Unknown".to_string()),
                author_image: author.and_then(|u| u.image.clone()),
                text: m.text,
                reply_to: m.reply_to,
                attachments: m
                    .attachments
                    .into_iter()
                    .map(|a| AttachmentView {
                        url: resolve_url(&a.content_key),
                        content_key: a.content_key,
                        name: a.name,
                        mime_type: a.mime_type,
                    })
                    .collect(),
                link_previews: m.link_previews,
                reactions: grouped.remove(&m.id).unwrap_or_default(),
                reply_count: reply_counts.get(&m.id).copied().unwrap_or(0),
                created_at: m.created_at,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(author_id: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            destination: Destination::Channel(Uuid::new_v4()),
            author_id,
            text: "hi".into(),
            reply_to: None,
            attachments: vec![Attachment {
                content_key: "k".repeat(64),
                name: "plan.pdf".into(),
                mime_type: "application/pdf".into(),
            }],
            link_previews: vec![],
            created_at: Utc::now(),
        }
    }

    fn reaction(message_id: Uuid, user_id: Uuid, emoji: &str) -> Reaction {
        Reaction {
            message_id,
            user_id,
            emoji: emoji.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn groups_reactions_in_first_seen_order() {
        let (ada, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let m = message(ada);
        let reactions = vec![
            reaction(m.id, ada, "🎉"),
            reaction(m.id, bob, "👍"),
            reaction(m.id, bob, "🎉"),
        ];
        let counts = HashMap::from([(m.id, 2)]);

        let views = build_views(vec![m], &reactions, &counts, &HashMap::new(), |k| format!("/files/{k}"));
        let view = &views[0];

        assert_eq!(
            view.reactions,
            vec![
                ReactionGroup { emoji: "🎉".into(), count: 2, user_ids: vec![ada, bob] },
                ReactionGroup { emoji: "👍".into(), count: 1, user_ids: vec![bob] },
            ]
        );
        assert_eq!(view.reply_count, 2);
        assert_eq!(view.author_name, "Unknown");
        assert_eq!(view.attachments[0].url, format!("/files/{}", "k".repeat(64)));
    }

    #[test]
    fn fills_in_author_details() {
        let ada = User {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            image: Some("https://example.com/ada.png".into()),
            last_seen: None,
            created_at: Utc::now(),
        };
        let m = message(ada.id);
        let authors = HashMap::from([(ada.id, ada.clone())]);

        let views = build_views(vec![m], &[], &HashMap::new(), &authors, str::to_string);
        assert_eq!(views[0].author_name, "Ada");
        assert_eq!(views[0].author_image, ada.image);
        assert!(views[0].reactions.is_empty());
        assert_eq!(views[0].reply_count, 0);
    }
}
