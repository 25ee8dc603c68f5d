use std::{fmt, sync::Arc};

use log::debug;
use serde_json::Value;

use crate::{
    client::{Client, mutation_reply, query_reply},
    error::ClientError,
    protocol::{
        Body, CommandKind, DeleteData, Document, Envelope, InsertData, Payload, SelectData,
        UpdateData,
    },
    schema::TableKeys,
};

use super::{DefaultNaming, NamingStrategy, ResultSet};

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Attributes to project; empty selects every column.
    pub fields: Vec<String>,
    /// Row limit; 0 means unlimited.
    pub limit: u32,
}

#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Explicit where clause, in attribute names. Skips key resolution.
    pub where_clause: Option<Document>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Attributes to delete; empty deletes the whole row.
    pub fields: Vec<String>,
    /// Accept a document that covers no key set; it is used as the where clause as is.
    pub delete_only_columns: bool,
}

/// Key set a document was matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMatch<'a> {
    Primary(&'a [String]),
    Index(&'a [String]),
}

impl<'a> KeyMatch<'a> {
    pub fn columns(&self) -> &'a [String] {
        match *self {
            KeyMatch::Primary(columns) | KeyMatch::Index(columns) => columns,
        }
    }
}

/// Picks the key set covered by `provided` (column names): the primary key when every
/// partition key column is present, otherwise the first fully covered index tuple in
/// catalog order.
pub fn resolve_keys<'a>(
    table: &str,
    keys: &'a TableKeys,
    provided: &Document,
) -> Result<KeyMatch<'a>, ClientError> {
    let covered = |columns: &[String]| columns.iter().all(|c| provided.contains_key(c));

    if !keys.primary_keys.is_empty() && covered(&keys.primary_keys) {
        return Ok(KeyMatch::Primary(&keys.primary_keys));
    }
    if let Some(index) = keys.index_keys.iter().find(|index| covered(index)) {
        return Ok(KeyMatch::Index(index));
    }

    Err(ClientError::MissingKeys {
        table: table.to_string(),
        primary: keys.primary_keys.clone(),
        indexes: keys.index_keys.clone(),
    })
}

fn where_for(columns: &[String], doc: &Document) -> Document {
    columns
        .iter()
        .filter_map(|column| Some((column.clone(), doc.get(column)?.clone())))
        .collect()
}

fn plan_select(
    table: &str,
    keys: &TableKeys,
    columns: Document,
    options: &FindOptions,
    naming: &dyn NamingStrategy,
) -> Result<SelectData, ClientError> {
    resolve_keys(table, keys, &columns)?;

    Ok(SelectData {
        where_clause: columns,
        columns: options
            .fields
            .iter()
            .map(|field| naming.column_name(field))
            .collect(),
        limit: options.limit,
    })
}

/// Columns used in the where clause are not repeated in the values.
fn plan_update(
    table: &str,
    keys: &TableKeys,
    columns: Document,
    explicit_where: Option<Document>,
) -> Result<UpdateData, ClientError> {
    let where_clause = match explicit_where {
        Some(where_clause) => where_clause,
        None => where_for(resolve_keys(table, keys, &columns)?.columns(), &columns),
    };
    let columns = columns
        .into_iter()
        .filter(|(column, _)| !where_clause.contains_key(column))
        .collect();

    Ok(UpdateData {
        where_clause,
        columns,
    })
}

fn plan_remove(
    table: &str,
    keys: &TableKeys,
    columns: Document,
    fields: Vec<String>,
    delete_only_columns: bool,
) -> Result<DeleteData, ClientError> {
    let where_clause = match resolve_keys(table, keys, &columns) {
        Ok(matched) => where_for(matched.columns(), &columns),
        Err(_) if delete_only_columns => columns,
        Err(e) => return Err(e),
    };

    Ok(DeleteData {
        where_clause,
        columns: fields,
    })
}

/// Sequences of objects are user-defined-type values.
fn holds_user_type(doc: &Document) -> bool {
    doc.values().any(|value| match value {
        Value::Array(items) => items.iter().any(Value::is_object),
        _ => false,
    })
}

/// Document operations on one table.
#[derive(Clone)]
pub struct ModelMapper {
    client: Client,
    keyspace: String,
    table: String,
    naming: Arc<dyn NamingStrategy>,
    include_type: bool,
}

impl ModelMapper {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            keyspace: client.config().keyspace.clone(),
            table: table.into(),
            naming: Arc::new(DefaultNaming),
            include_type: false,
            client,
        }
    }

    pub fn with_naming(mut self, naming: impl NamingStrategy + 'static) -> Self {
        self.naming = Arc::new(naming);
        self
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = keyspace.into();
        self
    }

    /// Always send the table name as the type hint on insert and update.
    pub fn include_type(mut self, include: bool) -> Self {
        self.include_type = include;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    fn keys(&self) -> Result<TableKeys, ClientError> {
        self.client
            .catalog()
            .and_then(|catalog| catalog.table(&self.table).cloned())
            .ok_or_else(|| ClientError::TableNotFound(self.table.clone()))
    }

    fn envelope(&self, payload: Payload) -> Envelope {
        Envelope::new(payload).on_table(&self.keyspace, &self.table)
    }

    fn type_hint(&self, doc: &Document) -> Option<String> {
        (self.include_type || holds_user_type(doc)).then(|| self.table.clone())
    }

    async fn select(
        &self,
        doc: &Document,
        options: &FindOptions,
    ) -> Result<Option<Vec<Document>>, ClientError> {
        let keys = self.keys()?;
        let data = plan_select(
            &self.table,
            &keys,
            self.naming.document_to_columns(doc),
            options,
            self.naming.as_ref(),
        )?;

        let envelope = self.envelope(Payload::Select(Body::Request(data)));
        let Some(reply) = self.client.request(envelope).await? else {
            debug!("select on {} timed out", self.table);
            return Ok(None);
        };
        Ok(Some(query_reply(reply, CommandKind::Select)?.result))
    }

    /// First matching row, or `None` when nothing matched or the request timed out.
    pub async fn get(
        &self,
        doc: &Document,
        options: FindOptions,
    ) -> Result<Option<Document>, ClientError> {
        let rows = self.select(doc, &options).await?;
        Ok(rows
            .and_then(|rows| rows.into_iter().next())
            .map(|row| self.naming.document_to_properties(&row)))
    }

    /// Every matching row; empty when the request timed out.
    pub async fn find(&self, doc: &Document, options: FindOptions) -> Result<ResultSet, ClientError> {
        Ok(match self.select(doc, &options).await? {
            Some(rows) => ResultSet::from_columns(&rows, self.naming.as_ref()),
            None => ResultSet::default(),
        })
    }

    /// Inserts `doc`, returning it when the bridge reports success.
    pub async fn insert(
        &self,
        doc: &Document,
        options: InsertOptions,
    ) -> Result<Option<Document>, ClientError> {
        self.keys()?;

        let data = InsertData {
            columns: self.naming.document_to_columns(doc),
            if_not_exists: options.if_not_exists,
        };
        let envelope = self
            .envelope(Payload::Insert(Body::Request(data)))
            .with_type_hint(self.type_hint(doc));

        let Some(reply) = self.client.request(envelope).await? else {
            debug!("insert into {} timed out", self.table);
            return Ok(None);
        };
        let reply = mutation_reply(reply, CommandKind::Insert)?;
        Ok(reply.success.then(|| doc.clone()))
    }

    /// Updates the row addressed by `doc`'s keys (or `options.where_clause`) with the
    /// remaining attributes.
    pub async fn update(
        &self,
        doc: &Document,
        options: UpdateOptions,
    ) -> Result<Option<Document>, ClientError> {
        let keys = self.keys()?;
        let explicit_where = options
            .where_clause
            .as_ref()
            .map(|where_clause| self.naming.document_to_columns(where_clause));
        let data = plan_update(
            &self.table,
            &keys,
            self.naming.document_to_columns(doc),
            explicit_where,
        )?;

        let envelope = self
            .envelope(Payload::Update(Body::Request(data)))
            .with_type_hint(self.type_hint(doc));
        let Some(reply) = self.client.request(envelope).await? else {
            debug!("update of {} timed out", self.table);
            return Ok(None);
        };
        let reply = mutation_reply(reply, CommandKind::Update)?;
        Ok(reply.success.then(|| doc.clone()))
    }

    /// Deletes the row addressed by `doc`, or only `options.fields` of it.
    /// `false` when the bridge did not report success or the request timed out.
    pub async fn remove(&self, doc: &Document, options: RemoveOptions) -> Result<bool, ClientError> {
        let keys = self.keys()?;
        let fields = options
            .fields
            .iter()
            .map(|field| self.naming.column_name(field))
            .collect();
        let data = plan_remove(
            &self.table,
            &keys,
            self.naming.document_to_columns(doc),
            fields,
            options.delete_only_columns,
        )?;

        let envelope = self.envelope(Payload::Delete(Body::Request(data)));
        let Some(reply) = self.client.request(envelope).await? else {
            debug!("delete from {} timed out", self.table);
            return Ok(false);
        };
        Ok(mutation_reply(reply, CommandKind::Delete)?.success)
    }
}

impl fmt::Debug for ModelMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMapper")
            .field("keyspace", &self.keyspace)
            .field("table", &self.table)
            .field("include_type", &self.include_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::Instant;

    use crate::{
        mapping::SnakeCamelNaming,
        protocol::{MutationReply, QueryReply},
        testing::{self, doc},
    };

    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn users_keys() -> TableKeys {
        TableKeys {
            primary_keys: strings(&["user_id"]),
            index_keys: vec![strings(&["email"]), strings(&["guild_id", "name"])],
        }
    }

    #[test]
    fn primary_key_wins() {
        let keys = users_keys();
        let provided = doc(json!({ "user_id": "1", "email": "a@b.c" }));

        assert_eq!(
            resolve_keys("users", &keys, &provided).unwrap(),
            KeyMatch::Primary(&keys.primary_keys)
        );
    }

    #[test]
    fn first_covered_index_tuple_wins() {
        let keys = users_keys();
        let provided = doc(json!({ "name": "ada", "guild_id": "g" }));

        assert_eq!(
            resolve_keys("users", &keys, &provided).unwrap().columns(),
            strings(&["guild_id", "name"]).as_slice()
        );
    }

    #[test]
    fn partial_index_tuple_is_not_enough() {
        let keys = users_keys();
        let provided = doc(json!({ "name": "ada" }));

        let err = resolve_keys("users", &keys, &provided).unwrap_err();
        assert!(matches!(err, ClientError::MissingKeys { ref table, .. } if table == "users"));
    }

    #[test]
    fn empty_document_names_the_primary_key() {
        let keys = TableKeys {
            primary_keys: strings(&["user_id"]),
            index_keys: vec![],
        };

        let err = resolve_keys("users", &keys, &Document::new()).unwrap_err();
        assert_eq!(err.to_string(), "missing required keys for 'users': user_id");
    }

    #[test]
    fn select_projects_translated_fields() {
        let options = FindOptions {
            fields: strings(&["displayName"]),
            limit: 10,
        };

        let data = plan_select(
            "users",
            &users_keys(),
            doc(json!({ "user_id": "1" })),
            &options,
            &SnakeCamelNaming,
        )
        .unwrap();
        assert_eq!(data.columns, strings(&["display_name"]));
        assert_eq!(data.limit, 10);
        assert_eq!(data.where_clause, doc(json!({ "user_id": "1" })));
    }

    #[test]
    fn update_keeps_keys_out_of_values() {
        let data = plan_update(
            "users",
            &users_keys(),
            doc(json!({ "user_id": "1", "email": "a@b.c", "name": "ada" })),
            None,
        )
        .unwrap();

        assert_eq!(data.where_clause, doc(json!({ "user_id": "1" })));
        assert_eq!(data.columns, doc(json!({ "email": "a@b.c", "name": "ada" })));
    }

    #[test]
    fn update_by_index_tuple() {
        let data = plan_update(
            "users",
            &users_keys(),
            doc(json!({ "email": "a@b.c", "name": "ada" })),
            None,
        )
        .unwrap();

        assert_eq!(data.where_clause, doc(json!({ "email": "a@b.c" })));
        assert_eq!(data.columns, doc(json!({ "name": "ada" })));
    }

    #[test]
    fn update_with_explicit_where_skips_resolution() {
        let data = plan_update(
            "users",
            &users_keys(),
            doc(json!({ "name": "ada", "bio": "x" })),
            Some(doc(json!({ "name": "ada" }))),
        )
        .unwrap();

        assert_eq!(data.where_clause, doc(json!({ "name": "ada" })));
        assert_eq!(data.columns, doc(json!({ "bio": "x" })));
    }

    #[test]
    #[should_panic(expected = "MissingKeys")]
    fn update_without_keys_fails() {
        plan_update("users", &users_keys(), doc(json!({ "bio": "x" })), None).unwrap();
    }

    #[test]
    fn remove_uses_key_columns_only() {
        let data = plan_remove(
            "users",
            &users_keys(),
            doc(json!({ "user_id": "1", "bio": "x" })),
            strings(&["bio"]),
            false,
        )
        .unwrap();

        assert_eq!(data.where_clause, doc(json!({ "user_id": "1" })));
        assert_eq!(data.columns, strings(&["bio"]));
    }

    #[test]
    fn column_delete_bypasses_coverage() {
        let keys = users_keys();
        let provided = doc(json!({ "name": "ada" }));

        assert!(plan_remove("users", &keys, provided.clone(), vec![], false).is_err());
        let data = plan_remove("users", &keys, provided.clone(), strings(&["bio"]), true).unwrap();
        assert_eq!(data.where_clause, provided);
    }

    #[test]
    fn arrays_of_objects_need_the_type_hint() {
        assert!(holds_user_type(&doc(json!({ "tokens": [{ "token": "t" }] }))));
        assert!(!holds_user_type(&doc(json!({ "tags": ["a", "b"] }))));
    }

    #[tokio::test]
    async fn get_translates_both_ways() {
        let (client, mut session, _bridge) = testing::ready_client().await;
        let users = client.model("users").with_naming(SnakeCamelNaming);

        let pending = tokio::spawn(async move {
            users
                .get(&doc(json!({ "userId": "1" })), FindOptions::default())
                .await
        });
        let request = session.recv().await;
        assert_eq!(request.table.as_deref(), Some("users"));
        assert_eq!(request.keyspace.as_deref(), Some("app"));
        match &request.payload {
            Payload::Select(Body::Request(select)) => {
                assert_eq!(select.where_clause, doc(json!({ "user_id": "1" })));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        session.reply(
            &request,
            Payload::Select(Body::Reply(QueryReply {
                result: vec![doc(json!({ "user_id": "1", "display_name": "ada" }))],
                error: None,
            })),
        );

        let user = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(user, doc(json!({ "userId": "1", "displayName": "ada" })));
    }

    #[tokio::test]
    async fn get_without_keys_sends_nothing() {
        let (client, mut session, _bridge) = testing::ready_client().await;

        let err = client
            .model("users")
            .get(&Document::new(), FindOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::MissingKeys { ref primary, .. } if primary == &strings(&["user_id"])
        ));
        assert!(err.to_string().contains("user_id"));
        assert!(session.try_recv().is_none());
    }

    #[tokio::test]
    async fn unknown_table_is_rejected() {
        let (client, _session, _bridge) = testing::ready_client().await;

        let err = client
            .model("nope")
            .insert(&doc(json!({ "id": 1 })), InsertOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::TableNotFound(table) if table == "nope"));
    }

    #[tokio::test]
    async fn tampered_reply_is_an_integrity_error() {
        let (client, mut session, _bridge) = testing::ready_client().await;
        let users = client.model("users");

        let pending = tokio::spawn(async move {
            users
                .find(&doc(json!({ "user_id": "1" })), FindOptions::default())
                .await
        });
        let request = session.recv().await;
        session.reply_tampered(
            &request,
            Payload::Select(Body::Reply(QueryReply {
                result: vec![doc(json!({ "user_id": "1" }))],
                error: None,
            })),
        );

        assert!(matches!(
            pending.await.unwrap(),
            Err(ClientError::Integrity { .. })
        ));
        assert_eq!(client.state(), crate::client::ConnectionState::Connected);
    }

    #[tokio::test]
    async fn bridge_error_is_a_failed_query() {
        let (client, mut session, _bridge) = testing::ready_client().await;
        let users = client.model("users");

        let pending = tokio::spawn(async move {
            users
                .update(
                    &doc(json!({ "user_id": "1", "email": "x" })),
                    UpdateOptions::default(),
                )
                .await
        });
        let request = session.recv().await;
        match &request.payload {
            Payload::Update(Body::Request(update)) => {
                assert_eq!(update.where_clause, doc(json!({ "user_id": "1" })));
                assert_eq!(update.columns, doc(json!({ "email": "x" })));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        session.reply(
            &request,
            Payload::Update(Body::Reply(MutationReply {
                success: false,
                error: Some("Undefined column name nope".into()),
            })),
        );

        assert!(matches!(
            pending.await.unwrap(),
            Err(ClientError::FailedQuery(msg)) if msg == "Undefined column name nope"
        ));
    }

    #[tokio::test]
    async fn insert_flags_user_type_values() {
        let (client, mut session, _bridge) = testing::ready_client().await;
        let users = client.model("users");
        let user = doc(json!({ "user_id": "1", "tokens": [{ "token": "t" }] }));

        let pending = tokio::spawn({
            let user = user.clone();
            async move {
                users
                    .insert(&user, InsertOptions { if_not_exists: true })
                    .await
            }
        });
        let request = session.recv().await;
        assert_eq!(request.type_hint.as_deref(), Some("users"));
        match &request.payload {
            Payload::Insert(Body::Request(insert)) => assert!(insert.if_not_exists),
            other => panic!("unexpected payload {other:?}"),
        }
        session.reply(
            &request,
            Payload::Insert(Body::Reply(MutationReply {
                success: true,
                error: None,
            })),
        );

        assert_eq!(pending.await.unwrap().unwrap(), Some(user));
    }

    #[tokio::test]
    async fn remove_reports_success() {
        let (client, mut session, _bridge) = testing::ready_client().await;
        let users = client.model("users");

        let pending = tokio::spawn(async move {
            users
                .remove(&doc(json!({ "email": "a@b.c" })), RemoveOptions::default())
                .await
        });
        let request = session.recv().await;
        match &request.payload {
            Payload::Delete(Body::Request(delete)) => {
                assert_eq!(delete.where_clause, doc(json!({ "email": "a@b.c" })));
                assert!(delete.columns.is_empty());
            }
            other => panic!("unexpected payload {other:?}"),
        }
        session.reply(
            &request,
            Payload::Delete(Body::Reply(MutationReply {
                success: true,
                error: None,
            })),
        );

        assert!(pending.await.unwrap().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_requests_resolve_empty() {
        let (client, mut session, _bridge) = testing::ready_client().await;
        let users = client.model("users");
        let key = doc(json!({ "user_id": "1" }));

        let started = Instant::now();
        let (found, removed) = tokio::join!(
            users.find(&key, FindOptions::default()),
            users.remove(&key, RemoveOptions::default()),
        );
        assert!(found.unwrap().is_empty());
        assert!(!removed.unwrap());
        assert!(started.elapsed() >= Duration::from_secs(15));

        assert_eq!(session.recv().await.command(), CommandKind::Select);
        assert_eq!(session.recv().await.command(), CommandKind::Delete);
    }
}
