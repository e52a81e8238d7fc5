// CombinedDataService — one read API over local and crawled evidence.
//
// Risk factors ask questions ("when did we first see this key?", "who else
// posted this link?") without caring which store answers. Each question
// has its own merge policy, implemented in `merge`.

pub mod merge;

use std::collections::BTreeMap;

use anyhow::Result;
use rusqlite::Connection;

use crate::db::models::{
    KarmaRecord, LinkRecord, ModerationStats, SubplebbitBanRecord, TextField, TextRecord,
    VelocityCounts,
};
use crate::db::queries as local;
use crate::indexer::queries as indexed;
use crate::util::text::{jaccard_similarity, prefilter_terms, word_set};

/// A stored text that resembles the one being evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarText {
    pub author_public_key: String,
    pub timestamp: i64,
    pub similarity: f64,
}

pub struct CombinedDataService<'a> {
    conn: &'a Connection,
}

impl<'a> CombinedDataService<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Earliest observation of the key in either store.
    pub fn author_first_seen(&self, public_key: &str) -> Result<Option<i64>> {
        Ok(merge::oldest(
            local::local_first_seen(self.conn, public_key)?,
            indexed::indexed_first_seen(self.conn, public_key)?,
        ))
    }

    /// Most recently observed karma per forum.
    pub fn author_karma_by_subplebbit(
        &self,
        public_key: &str,
    ) -> Result<BTreeMap<String, KarmaRecord>> {
        let local_records = local::local_karma_records(self.conn, public_key)?;
        let indexed_records = indexed::indexed_karma_records(self.conn, public_key)?;
        Ok(merge::latest_karma_per_subplebbit(
            &local_records,
            &indexed_records,
        ))
    }

    /// Publications per type since `since`, summed across stores.
    pub fn author_velocity(&self, public_key: &str, since: i64) -> Result<VelocityCounts> {
        Ok(merge::sum_counts(
            local::local_velocity(self.conn, public_key, since)?,
            indexed::indexed_velocity(self.conn, public_key, since)?,
        ))
    }

    /// Every stored comment text since `since` at least `min_similarity`
    /// similar to `text`, newest first.
    ///
    /// The whole window is searched; SQL only drops rows sharing none of the
    /// words a match would need.
    pub fn find_similar_texts(
        &self,
        field: TextField,
        text: &str,
        since: i64,
        min_similarity: f64,
    ) -> Result<Vec<SimilarText>> {
        let target = word_set(text);
        if target.is_empty() {
            return Ok(Vec::new());
        }

        let terms = prefilter_terms(&target, min_similarity);
        let local_texts = local::local_comment_texts(self.conn, field, since, terms.as_deref())?;
        let indexed_texts =
            indexed::indexed_comment_texts(self.conn, field, since, terms.as_deref())?;
        let candidates: Vec<TextRecord> = merge::union_by_recency(
            &local_texts,
            &indexed_texts,
            |r| (r.author_public_key.clone(), r.timestamp, r.text.clone()),
            |r| r.timestamp,
            usize::MAX,
        );

        let matches: Vec<SimilarText> = candidates
            .into_iter()
            .filter_map(|record| {
                let similarity = jaccard_similarity(&target, &word_set(&record.text));
                (similarity >= min_similarity).then(|| SimilarText {
                    author_public_key: record.author_public_key,
                    timestamp: record.timestamp,
                    similarity,
                })
            })
            .collect();
        Ok(matches)
    }

    /// Link-bearing comments since `since` from both stores, newest first.
    ///
    /// With `hosts`, only comments mentioning one of them are returned;
    /// without, every link-bearing comment in the window is.
    pub fn find_links(&self, since: i64, hosts: Option<&[String]>) -> Result<Vec<LinkRecord>> {
        let local_links = local::local_link_records(self.conn, since, hosts)?;
        let indexed_links = indexed::indexed_link_records(self.conn, since, hosts)?;
        Ok(merge::union_by_recency(
            &local_links,
            &indexed_links,
            |r| {
                (
                    r.author_public_key.clone(),
                    r.timestamp,
                    r.link.clone(),
                    r.content.clone(),
                    r.title.clone(),
                )
            },
            |r| r.timestamp,
            usize::MAX,
        ))
    }

    /// Every author key that has claimed the wallet, in either store.
    pub fn wallet_claimants(&self, wallet_address: &str) -> Result<Vec<String>> {
        Ok(merge::union_distinct(
            &local::local_wallet_claimants(self.conn, wallet_address)?,
            &indexed::indexed_wallet_claimants(self.conn, wallet_address)?,
        ))
    }

    /// Posts and replies attributed to the wallet since `since`, across all its authors.
    pub fn wallet_velocity(&self, wallet_address: &str, since: i64) -> Result<VelocityCounts> {
        Ok(merge::sum_counts(
            local::local_wallet_velocity(self.conn, wallet_address, since)?,
            indexed::indexed_wallet_velocity(self.conn, wallet_address, since)?,
        ))
    }

    // Ban and removal history only exist in crawled data.

    pub fn ban_records(&self, public_key: &str) -> Result<Vec<SubplebbitBanRecord>> {
        indexed::ban_records(self.conn, public_key)
    }

    pub fn moderation_stats(&self, public_key: &str) -> Result<ModerationStats> {
        indexed::moderation_stats(self.conn, public_key)
    }

    // OAuth links only exist in local sessions.

    pub fn oauth_identities(&self, public_key: &str) -> Result<Vec<String>> {
        local::oauth_identities_for_author(self.conn, public_key)
    }

    pub fn oauth_identity_author_count(&self, identity: &str) -> Result<i64> {
        local::oauth_identity_author_count(self.conn, identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queries::{insert_publication, insert_session};
    use crate::db::schema::create_tables;
    use crate::indexer::queries::{insert_comment_ipfs, upsert_comment_update};
    use crate::testutil::{comment_request, page_comment, session_for};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    #[test]
    fn test_first_seen_takes_oldest_source() {
        let conn = test_conn();
        let publication = comment_request("pk1", "hello").publication;
        insert_session(&conn, &session_for("s1", &publication, 5000)).unwrap();
        insert_publication(&conn, "s1", &publication, 5000).unwrap();

        let item = page_comment("QmA", "pk1", "other.eth", "earlier", 1000);
        insert_comment_ipfs(&conn, "QmA", &item.comment, 6000).unwrap();

        let service = CombinedDataService::new(&conn);
        assert_eq!(service.author_first_seen("pk1").unwrap(), Some(1000));
        assert_eq!(service.author_first_seen("nobody").unwrap(), None);
    }

    #[test]
    fn test_similar_texts_union_both_sources() {
        let conn = test_conn();
        let publication = comment_request("pk1", "buy cheap tokens now").publication;
        insert_session(&conn, &session_for("s1", &publication, 100)).unwrap();
        insert_publication(&conn, "s1", &publication, 100).unwrap();

        let item = page_comment("QmA", "pk2", "x.eth", "buy cheap tokens now", 200);
        insert_comment_ipfs(&conn, "QmA", &item.comment, 300).unwrap();
        upsert_comment_update(&conn, &item, 300).unwrap();

        let unrelated = page_comment("QmB", "pk3", "x.eth", "lovely weather today", 250);
        insert_comment_ipfs(&conn, "QmB", &unrelated.comment, 300).unwrap();

        let service = CombinedDataService::new(&conn);
        let matches = service
            .find_similar_texts(TextField::Content, "Buy cheap tokens NOW", 0, 0.6)
            .unwrap();
        assert_eq!(matches.len(), 2);
        // newest first
        assert_eq!(matches[0].author_public_key, "pk2");
        assert!((matches[0].similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_similar_texts_empty_input() {
        let conn = test_conn();
        let service = CombinedDataService::new(&conn);
        assert!(service
            .find_similar_texts(TextField::Title, "   ", 0, 0.6)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_similar_texts_search_whole_window() {
        let conn = test_conn();
        let target = page_comment("QmOld", "pk1", "x.eth", "claim your free airdrop today", 100);
        insert_comment_ipfs(&conn, "QmOld", &target.comment, 100).unwrap();
        for i in 0..2500 {
            let cid = format!("QmNoise{i}");
            let noise = page_comment(&cid, "pk2", "x.eth", &format!("weather report {i}"), 200 + i);
            insert_comment_ipfs(&conn, &cid, &noise.comment, 300).unwrap();
        }

        let service = CombinedDataService::new(&conn);
        let matches = service
            .find_similar_texts(TextField::Content, "Claim your FREE airdrop today!", 0, 0.6)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].author_public_key, "pk1");
    }

    #[test]
    fn test_find_links_filters_by_host() {
        let conn = test_conn();
        let mut wanted = page_comment("QmA", "pk1", "x.eth", "see https://WWW.Shop.example/ref", 100);
        wanted.comment.link = None;
        insert_comment_ipfs(&conn, "QmA", &wanted.comment, 100).unwrap();
        let other = page_comment("QmB", "pk2", "x.eth", "see https://news.example/story", 200);
        insert_comment_ipfs(&conn, "QmB", &other.comment, 200).unwrap();

        let service = CombinedDataService::new(&conn);
        let hosts = vec!["shop.example".to_string()];
        let links = service.find_links(0, Some(&hosts)).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].author_public_key, "pk1");
        assert_eq!(service.find_links(0, None).unwrap().len(), 2);
    }
}
