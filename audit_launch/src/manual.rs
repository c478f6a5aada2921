/*!

This is the long-form manual for `audit_launch` and `auditlaunch`.

## The review

Before the first round of a risk-limiting audit can start, the audit
administrator reviews the state of the audit and chooses a sample size for
every target contest. The round can be launched once:

1. every jurisdiction of the audit has processed all its files
   (ballot manifest, plus batch tallies or CVRs depending on the audit type),
2. for ballot comparison and hybrid audits, every contest name found in the
   CVR files has been matched to a target or opportunistic contest,
3. the sample size calculation has completed for every target contest,
4. every selected sample size is valid,
5. no selection amounts to a forbidden full hand tally.

Only the first unmet condition is reported.

## Sample sizes

The options computed by the service are listed first, followed by a custom
entry. The first computed option is selected by default.

A custom size must be a whole number between 1 and the total number of
ballots in the contest. For batch comparison audits the limit is the number of
batches of the jurisdictions in the contest universe. Hybrid audits take two
numbers, CVR ballots and non-CVR ballots, each bounded by its own total.

A selection that covers the whole contest is a full hand tally:
- ballot polling: allowed with a single target contest, otherwise an error;
- batch comparison: allowed;
- ballot comparison: always an error;
- hybrid: never checked.

## Session files

`auditlaunch` replays a recorded session. The file is a JSON object with the
following keys:

* `auditId` an identifier, copied to the report
* `settings` `{auditName, auditType, riskLimit, randomSeed, state}`, where
  `auditType` is one of `BALLOT_POLLING`, `BATCH_COMPARISON`,
  `BALLOT_COMPARISON`, `HYBRID`
* `jurisdictions` the jurisdictions with their `ballotManifest`,
  `batchTallies` and `cvrs` files. A file is
  `{processing: {status, error}, numBallots, numBatches, numBallotsCvr, numBallotsNonCvr}`
  with status one of `READY_TO_PROCESS`, `PROCESSING`, `PROCESSED`, `ERRORED`
* `contests` `{id, name, isTargeted, choices, numWinners, votesAllowed, totalBallotsCast, jurisdictionIds}`
* `standardizations` (optional) `{standardizations: {jurisdictionId: {contestName: cvrContestName or null}}, cvrContestNames: {jurisdictionId: [names]}}`
* `round` (optional) `{roundNum, isAuditComplete}` when a round was already launched
* `sampleSizeResponses` the successive answers of the sample size calculation,
  `{sampleSizes: {contestId: [{key, size, prob, sizeCvr, sizeNonCvr}]}, selected, task: {status, error}}`.
  The last answer repeats.
* `samplePreviewResponses` (optional) the successive answers of the sample preview,
  `{jurisdictions: [{name, numSamples, numUnique}], task}`
* `events` the actions of the administrator, in order. Each has a `type`:
  - `selectOption` `{contestId, key}`
  - `selectCustom` `{contestId}`
  - `customSize` `{contestId, value}`
  - `customSplit` `{contestId, cvr, nonCvr}`
  - `standardize` `{standardizations: {jurisdictionId: {contestName: cvrContestName or null}}}`
  - `previewSample`
  - `launch`
* `pollIntervalMs`, `maxTicks` (optional) polling settings, overridden by the
  command line

An event that is refused (for example a launch while a selection is invalid)
is listed under `eventErrors` in the report and the replay goes on.

## Report

The report contains the launch readiness and its reason, the jurisdictions in
progress order with their status labels, the standardization status, one
entry per target contest (calculation state, option labels, selection,
validation message, full hand tally verdict), the sample preview and the
launched round, if any.

With `--reference`, the report is compared to a reference report and the
differences are printed.

*/
