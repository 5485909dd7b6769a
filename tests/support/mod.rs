pub mod faulty_directory;

pub use faulty_directory::FaultyDirectory;
