mod mock;
mod scenarios;
