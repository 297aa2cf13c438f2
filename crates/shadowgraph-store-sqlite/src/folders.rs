use anyhow::{Context, Result};
use rusqlite::params;
use shadowgraph_core::{GraphError, Node, NodeDraft, NodeId, NodeKind};

use crate::{query_nodes, sort_newest_first, upsert_node_in, SqliteStore, NODE_COLUMNS};

fn normalize(path: &str) -> &str {
    path.trim_end_matches('/')
}

impl SqliteStore {
    /// Create or describe a `FOLDER` node for a directory path.
    ///
    /// # Errors
    /// Returns [`GraphError::Validation`] for an empty path.
    pub fn create_folder(&mut self, path: &str, description: Option<&str>) -> Result<Node> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(GraphError::Validation("folder path MUST NOT be empty".to_string()).into());
        }
        let tx = self.write_tx()?;
        let folder = upsert_node_in(
            &tx,
            &NodeDraft::new(NodeId::folder(path), NodeKind::Folder, description.unwrap_or(""))
                .with_path(path),
        )?;
        tx.commit().context("failed to commit folder")?;
        tracing::debug!("folder {path} recorded");
        Ok(folder)
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn get_folder(&self, path: &str) -> Result<Option<Node>> {
        let mut folders = query_nodes(
            &self.conn,
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE kind = 'FOLDER' AND path = ?1"),
            params![normalize(path)],
        )?;
        Ok(folders.pop())
    }

    /// Code blocks whose file lives under `path`, ordered by file then id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_folder_contents(&self, path: &str) -> Result<Vec<Node>> {
        let prefix = format!("{}/", normalize(path));
        query_nodes(
            &self.conn,
            &format!(
                "SELECT {NODE_COLUMNS} FROM nodes
                 WHERE kind = 'CODE_BLOCK' AND path IS NOT NULL
                   AND substr(path, 1, length(?1)) = ?1
                 ORDER BY path ASC, id ASC"
            ),
            params![prefix],
        )
    }

    /// Thoughts attached to the folder or any folder nested below it, newest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn folder_thoughts(&self, path: &str) -> Result<Vec<Node>> {
        let folder_id = NodeId::folder(normalize(path));
        let nested_prefix = format!("{folder_id}/");
        let mut thoughts = query_nodes(
            &self.conn,
            "SELECT n.id, n.kind, n.content, n.path, n.created_at
             FROM edges e JOIN nodes n ON n.id = e.target_id
             WHERE e.relation = 'HAS_THOUGHT' AND n.kind = 'THOUGHT'
               AND (e.source_id = ?1 OR substr(e.source_id, 1, length(?2)) = ?2)",
            params![folder_id.as_str(), nested_prefix],
        )?;
        sort_newest_first(&mut thoughts);
        Ok(thoughts)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use shadowgraph_core::{NodeId, NodeKind};

    use crate::tests::{extracted, memory_store};

    #[test]
    fn folder_contents_match_on_path_prefix() -> Result<()> {
        let mut store = memory_store()?;
        store.index_symbols("src/api/auth.py", &[extracted("function:login", "ok()", 1)])?;
        store.index_symbols("src/api/users.py", &[extracted("class:User", "pass", 1)])?;
        store.index_symbols("src/apiary.py", &[extracted("function:bees", "pass", 1)])?;

        let folder = store.create_folder("src/api/", Some("HTTP handlers"))?;
        assert_eq!(folder.kind, NodeKind::Folder);
        assert_eq!(folder.id, NodeId::folder("src/api"));
        let described = store.get_folder("src/api")?.map(|f| f.content);
        assert_eq!(described.as_deref(), Some("HTTP handlers"));

        let contents = store.list_folder_contents("src/api")?;
        let paths = contents.iter().filter_map(|node| node.path.as_deref()).collect::<Vec<_>>();
        assert_eq!(paths, vec!["src/api/auth.py", "src/api/users.py"]);
        Ok(())
    }

    #[test]
    fn folder_thoughts_include_nested_folders() -> Result<()> {
        let mut store = memory_store()?;
        let api = store.create_folder("src/api", None)?;
        let v2 = store.create_folder("src/api/v2", None)?;
        let other = store.create_folder("src/apiary", None)?;
        store.attach_thought(&api.id, "all handlers are async")?;
        store.attach_thought(&v2.id, "v2 drops XML")?;
        store.attach_thought(&other.id, "unrelated")?;

        let thoughts = store.folder_thoughts("src/api")?;
        let mut texts = thoughts.iter().map(|t| t.content.as_str()).collect::<Vec<_>>();
        texts.sort_unstable();
        assert_eq!(texts, vec!["all handlers are async", "v2 drops XML"]);
        assert!(store.get_folder("src/missing")?.is_none());
        Ok(())
    }
}
