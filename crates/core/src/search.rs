use std::sync::Arc;

use crate::accel::{TextEmbedder, cosine_similarity};
use crate::data::Message;
use crate::store::ChatStore;

pub struct SearchFilter {
    pub peer_id: Option<String>,
    pub limit: i64,
}

pub struct SearchService {
    store: Arc<ChatStore>,
    embedder: Option<Arc<dyn TextEmbedder>>,
}

impl SearchService {
    pub fn new(store: Arc<ChatStore>, embedder: Option<Arc<dyn TextEmbedder>>) -> Arc<Self> {
        Arc::new(Self { store, embedder })
    }

    pub async fn search(
        &self,
        local_user_id: &str,
        query: &str,
        filter: SearchFilter,
        use_semantic: bool,
    ) -> Vec<Message> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        if !use_semantic {
            return self
                .store
                .search_keyword(local_user_id, query, filter.peer_id.as_deref(), filter.limit)
                .await;
        }

        let Some(embedder) = &self.embedder else {
            return self.fallback(local_user_id, &filter).await;
        };
        let Some(query_embedding) = embedder.embed_text(query) else {
            return self.fallback(local_user_id, &filter).await;
        };

        let candidate_limit = (filter.limit * 5).min(1000);
        let candidates = self
            .store
            .search_all(local_user_id, filter.peer_id.as_deref(), candidate_limit)
            .await;
        if candidates.is_empty() {
            return self.fallback(local_user_id, &filter).await;
        }

        let mut scored: Vec<(f32, Message)> = candidates
            .into_iter()
            .filter_map(|msg| {
                let content_embedding = embedder.embed_text(&msg.content)?;
                let score = cosine_similarity(&query_embedding, &content_embedding)?;
                Some((score, msg))
            })
            .collect();

        if scored.is_empty() {
            return self.fallback(local_user_id, &filter).await;
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.timestamp_ms.cmp(&b.1.timestamp_ms))
        });
        scored
            .into_iter()
            .take(filter.limit as usize)
            .map(|(_, msg)| msg)
            .collect()
    }

    async fn fallback(&self, local_user_id: &str, filter: &SearchFilter) -> Vec<Message> {
        self.store
            .search_all(local_user_id, filter.peer_id.as_deref(), filter.limit)
            .await
    }
}
