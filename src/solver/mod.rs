pub mod dispatch;
pub mod loading;
pub mod routing;
pub mod simulate;
