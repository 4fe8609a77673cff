mod archive_sweep;
mod redelivery;
mod review_stats;
