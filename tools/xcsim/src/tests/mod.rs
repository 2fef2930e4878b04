mod decoder;
mod scenario;
