// Pipeline processing: turning raw batches into clean and quarantined rows

pub mod normalize;
