pub mod apply;
pub mod bridge;
pub mod catalog;
pub mod diff;
pub mod dispatch;
pub mod event_loop;
pub mod session;
pub mod track;

#[cfg(test)]
mod test_helpers;
