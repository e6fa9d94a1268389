mod bus;
mod refresh_loop;

pub use bus::RefreshBus;
pub use refresh_loop::spawn_refresh_loop;
