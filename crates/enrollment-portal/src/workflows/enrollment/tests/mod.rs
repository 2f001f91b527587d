mod common;
mod dispatch;
