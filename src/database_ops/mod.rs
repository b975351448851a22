pub mod action_comments;
pub mod db;
