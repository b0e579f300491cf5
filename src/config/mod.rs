pub mod personas;
