use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub company_name: String,
    pub company_cif: String,
    pub phone: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub company_name: String,
    pub company_cif: String,
    pub phone: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = document_terms)]
pub struct DocumentTerms {
    pub id: Uuid,
    pub key: String,
    pub title: String,
    pub body_html: String,
    pub is_active: bool,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = document_types)]
pub struct DocumentType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub schema: serde_json::Value,
    pub series: String,
    pub next_number: i32,
    pub terms_id: Option<Uuid>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_types)]
pub struct NewDocumentType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub schema: serde_json::Value,
    pub series: String,
    pub next_number: i32,
    pub terms_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(DocumentType, foreign_key = doc_type_id))]
pub struct Document {
    pub id: Uuid,
    pub doc_type_id: Uuid,
    pub number: String,
    pub status: String,
    pub client_user_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub data: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub doc_type_id: Uuid,
    pub number: String,
    pub status: String,
    pub client_user_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub data: serde_json::Value,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_technicians)]
pub struct NewDocumentTechnician {
    pub document_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = request_statuses)]
pub struct RequestStatus {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub sort_order: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_statuses)]
pub struct NewRequestStatus {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = technicians)]
pub struct Technician {
    pub id: Uuid,
    pub name: String,
    pub company_name: String,
    pub company_cif: String,
    pub email: String,
    pub phone: String,
    pub category: String,
    pub user_id: Option<Uuid>,
    pub is_active: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = technicians)]
pub struct NewTechnician {
    pub id: Uuid,
    pub name: String,
    pub company_name: String,
    pub company_cif: String,
    pub email: String,
    pub phone: String,
    pub category: String,
    pub user_id: Option<Uuid>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: i64,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub subject: String,
    pub message: String,
    pub status_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub subject: String,
    pub message: String,
    pub status_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = public_requests)]
pub struct PublicRequest {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub company_cif: String,
    pub description: String,
    pub status_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = public_requests)]
pub struct NewPublicRequest {
    pub user_id: Option<Uuid>,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub company_cif: String,
    pub description: String,
    pub status_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = public_request_attachments)]
#[diesel(belongs_to(PublicRequest, foreign_key = request_id))]
pub struct PublicRequestAttachment {
    pub id: Uuid,
    pub request_id: i64,
    pub storage_key: String,
    pub original_name: String,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = public_request_attachments)]
pub struct NewPublicRequestAttachment {
    pub id: Uuid,
    pub request_id: i64,
    pub storage_key: String,
    pub original_name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = chat_messages)]
pub struct ChatMessage {
    pub id: i64,
    pub target_kind: String,
    pub target_id: i64,
    pub author_id: Uuid,
    pub body: String,
    pub reply_to_id: Option<i64>,
    pub visibility: String,
    pub created_at: NaiveDateTime,
    pub edited_at: Option<NaiveDateTime>,
    pub is_deleted: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewChatMessage {
    pub target_kind: String,
    pub target_id: i64,
    pub author_id: Uuid,
    pub body: String,
    pub reply_to_id: Option<i64>,
    pub visibility: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = chat_attachments)]
#[diesel(belongs_to(ChatMessage, foreign_key = message_id))]
pub struct ChatAttachment {
    pub id: Uuid,
    pub message_id: i64,
    pub storage_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_attachments)]
pub struct NewChatAttachment {
    pub id: Uuid,
    pub message_id: i64,
    pub storage_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_mentions)]
pub struct NewChatMention {
    pub message_id: i64,
    pub user_id: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_reads)]
pub struct NewChatRead {
    pub id: Uuid,
    pub target_kind: String,
    pub target_id: i64,
    pub user_id: Uuid,
    pub last_read_message_id: Option<i64>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = abuse_events)]
pub struct NewAbuseEvent {
    pub ip: Option<String>,
    pub user_id: Option<Uuid>,
    pub path: String,
    pub reason: String,
    pub user_agent: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = blocked_ips)]
pub struct NewBlockedIp {
    pub ip: String,
    pub blocked_until: NaiveDateTime,
    pub reason: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
